//! DNS Message Codec
//!
//! Just enough of RFC 1035 to read a single-question query and write an
//! answer made of A, CNAME and TXT records over UDP.

use std::net::Ipv4Addr;

/// DNS packet constants
pub const DNS_HEADER_SIZE: usize = 12;
pub const DNS_MAX_PACKET_SIZE: usize = 512;

/// DNS record types
pub const TYPE_A: u16 = 1;
pub const TYPE_CNAME: u16 = 5;
pub const TYPE_TXT: u16 = 16;

pub const CLASS_IN: u16 = 1;

/// DNS flags
const FLAG_QR: u16 = 0x8000; // Query/Response
const FLAG_AA: u16 = 0x0400; // Authoritative Answer
const FLAG_TC: u16 = 0x0200; // Truncated
const FLAG_RD: u16 = 0x0100; // Recursion Desired
const FLAG_RA: u16 = 0x0080; // Recursion Available
const OPCODE_MASK: u16 = 0x7800;

/// Compression pointer to the question name, which always sits right after the header
const QNAME_POINTER: u16 = 0xC000 | DNS_HEADER_SIZE as u16;

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;
const MAX_CHARACTER_STRING: usize = 255;

/// Response codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Rcode {
    NoError = 0,
    FormErr = 1,
    ServFail = 2,
    NotImp = 4,
    Refused = 5,
}

/// A parsed single-question query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub id: u16,
    pub flags: u16,

    /// Fully-qualified name with trailing dot, case as received
    pub name: String,

    pub qtype: u16,
    pub qclass: u16,
}

impl Query {
    /// Query for `name` with default header fields
    pub fn new(name: impl Into<String>, qtype: u16) -> Self {
        Self {
            id: 0,
            flags: FLAG_RD,
            name: name.into(),
            qtype,
            qclass: CLASS_IN,
        }
    }

    pub fn opcode(&self) -> u16 {
        (self.flags & OPCODE_MASK) >> 11
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAG_QR != 0
    }
}

/// Record data this server can emit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    Cname(String),
    Txt(String),
}

impl RData {
    pub fn rtype(&self) -> u16 {
        match self {
            RData::A(_) => TYPE_A,
            RData::Cname(_) => TYPE_CNAME,
            RData::Txt(_) => TYPE_TXT,
        }
    }
}

/// Answer section entry (class IN)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: String,
    pub ttl: u32,
    pub data: RData,
}

/// Human-readable type name for logs
pub fn type_name(qtype: u16) -> String {
    match qtype {
        TYPE_A => "A".to_string(),
        TYPE_CNAME => "CNAME".to_string(),
        TYPE_TXT => "TXT".to_string(),
        28 => "AAAA".to_string(),
        255 => "ANY".to_string(),
        other => format!("TYPE{}", other),
    }
}

/// Parse header and first question of a query packet
pub fn parse_query(packet: &[u8]) -> Result<Query, WireError> {
    if packet.len() < DNS_HEADER_SIZE {
        return Err(WireError::Truncated);
    }

    let id = u16::from_be_bytes([packet[0], packet[1]]);
    let flags = u16::from_be_bytes([packet[2], packet[3]]);
    let qdcount = u16::from_be_bytes([packet[4], packet[5]]);

    if qdcount == 0 {
        return Err(WireError::NoQuestion);
    }

    let (name, qtype, qclass) = parse_question(&packet[DNS_HEADER_SIZE..])?;

    Ok(Query {
        id,
        flags,
        name,
        qtype,
        qclass,
    })
}

/// Parse DNS question section
fn parse_question(data: &[u8]) -> Result<(String, u16, u16), WireError> {
    let mut name = String::new();
    let mut offset = 0;

    // Parse name labels
    loop {
        let len = *data.get(offset).ok_or(WireError::Truncated)? as usize;
        offset += 1;
        if len == 0 {
            break;
        }

        if len > MAX_LABEL_LEN {
            // Also rejects compression pointers, never valid in a lone question
            return Err(WireError::InvalidLabel);
        }

        let label = data.get(offset..offset + len).ok_or(WireError::Truncated)?;
        let label = std::str::from_utf8(label).map_err(|_| WireError::InvalidLabel)?;
        name.push_str(label);
        name.push('.');
        offset += len;

        if name.len() > MAX_NAME_LEN {
            return Err(WireError::NameTooLong);
        }
    }

    if name.is_empty() {
        name.push('.');
    }

    let fixed = data.get(offset..offset + 4).ok_or(WireError::Truncated)?;
    let qtype = u16::from_be_bytes([fixed[0], fixed[1]]);
    let qclass = u16::from_be_bytes([fixed[2], fixed[3]]);

    Ok((name, qtype, qclass))
}

/// Build a response to `query`.
///
/// If the answers do not fit in a UDP message they are dropped and TC is set.
pub fn build_response(query: &Query, rcode: Rcode, answers: &[ResourceRecord]) -> Result<Vec<u8>, WireError> {
    let response = encode_response(query, rcode, answers, false)?;
    if response.len() <= DNS_MAX_PACKET_SIZE {
        return Ok(response);
    }
    encode_response(query, rcode, &[], true)
}

/// Header-only FORMERR reply to a query whose question could not be parsed.
///
/// `None` when not even the header is present, or the message is itself a response.
pub fn build_format_error(packet: &[u8]) -> Option<Vec<u8>> {
    let header = packet.get(..DNS_HEADER_SIZE)?;
    let request_flags = u16::from_be_bytes([header[2], header[3]]);
    if request_flags & FLAG_QR != 0 {
        return None;
    }

    let flags = FLAG_QR | FLAG_RA | (request_flags & (FLAG_RD | OPCODE_MASK)) | Rcode::FormErr as u16;

    let mut response = Vec::with_capacity(DNS_HEADER_SIZE);
    response.extend_from_slice(&header[..2]); // id
    response.extend_from_slice(&flags.to_be_bytes());
    response.extend_from_slice(&[0; 8]); // no sections
    Some(response)
}

fn encode_response(
    query: &Query,
    rcode: Rcode,
    answers: &[ResourceRecord],
    truncated: bool,
) -> Result<Vec<u8>, WireError> {
    let mut response = Vec::with_capacity(DNS_MAX_PACKET_SIZE);

    let mut flags = FLAG_QR | FLAG_AA | FLAG_RA | (query.flags & (FLAG_RD | OPCODE_MASK)) | rcode as u16;
    if truncated {
        flags |= FLAG_TC;
    }

    // Build header
    response.extend_from_slice(&query.id.to_be_bytes());
    response.extend_from_slice(&flags.to_be_bytes());
    response.extend_from_slice(&1u16.to_be_bytes()); // qdcount = 1
    response.extend_from_slice(&(answers.len() as u16).to_be_bytes()); // ancount
    response.extend_from_slice(&0u16.to_be_bytes()); // nscount = 0
    response.extend_from_slice(&0u16.to_be_bytes()); // arcount = 0

    // Build question section (echo back)
    encode_name(&mut response, &query.name)?;
    response.extend_from_slice(&query.qtype.to_be_bytes());
    response.extend_from_slice(&query.qclass.to_be_bytes());

    // Build answer section
    for rr in answers {
        if rr.name.eq_ignore_ascii_case(&query.name) {
            response.extend_from_slice(&QNAME_POINTER.to_be_bytes());
        } else {
            encode_name(&mut response, &rr.name)?;
        }

        response.extend_from_slice(&rr.data.rtype().to_be_bytes());
        response.extend_from_slice(&CLASS_IN.to_be_bytes());
        response.extend_from_slice(&rr.ttl.to_be_bytes());

        let rdata = encode_rdata(&rr.data)?;
        response.extend_from_slice(&(rdata.len() as u16).to_be_bytes()); // rdlength
        response.extend_from_slice(&rdata);
    }

    Ok(response)
}

fn encode_rdata(data: &RData) -> Result<Vec<u8>, WireError> {
    let mut rdata = Vec::new();
    match data {
        RData::A(ip) => rdata.extend_from_slice(&ip.octets()),
        RData::Cname(target) => encode_name(&mut rdata, target)?,
        RData::Txt(text) => {
            let bytes = text.as_bytes();
            if bytes.is_empty() {
                rdata.push(0);
            }
            for chunk in bytes.chunks(MAX_CHARACTER_STRING) {
                rdata.push(chunk.len() as u8);
                rdata.extend_from_slice(chunk);
            }
        }
    }
    Ok(rdata)
}

fn encode_name(out: &mut Vec<u8>, name: &str) -> Result<(), WireError> {
    let trimmed = name.trim_end_matches('.');
    if trimmed.len() + 2 > MAX_NAME_LEN {
        return Err(WireError::NameTooLong);
    }

    if !trimmed.is_empty() {
        for label in trimmed.split('.') {
            if label.is_empty() || label.len() > MAX_LABEL_LEN {
                return Err(WireError::InvalidLabel);
            }
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
    }
    out.push(0); // End of name
    Ok(())
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("truncated message")]
    Truncated,

    #[error("message carries no question")]
    NoQuestion,

    #[error("invalid label")]
    InvalidLabel,

    #[error("name exceeds 255 bytes")]
    NameTooLong,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_packet(id: u16, name: &str, qtype: u16) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&id.to_be_bytes());
        data.extend_from_slice(&FLAG_RD.to_be_bytes());
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        encode_name(&mut data, name).unwrap();
        data.extend_from_slice(&qtype.to_be_bytes());
        data.extend_from_slice(&CLASS_IN.to_be_bytes());
        data
    }

    fn u16_at(data: &[u8], offset: usize) -> u16 {
        u16::from_be_bytes([data[offset], data[offset + 1]])
    }

    #[test]
    fn test_parse_query() {
        let packet = query_packet(0xbeef, "WWW.example.org.", TYPE_TXT);
        let query = parse_query(&packet).unwrap();

        assert_eq!(query.id, 0xbeef);
        assert_eq!(query.name, "WWW.example.org.");
        assert_eq!(query.qtype, TYPE_TXT);
        assert_eq!(query.qclass, CLASS_IN);
        assert_eq!(query.opcode(), 0);
        assert!(!query.is_response());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(parse_query(&[0u8; 5]), Err(WireError::Truncated));

        let mut packet = query_packet(1, "example.org.", TYPE_A);
        packet[5] = 0; // qdcount = 0
        assert_eq!(parse_query(&packet), Err(WireError::NoQuestion));

        let mut packet = query_packet(1, "example.org.", TYPE_A);
        packet.truncate(packet.len() - 2);
        assert_eq!(parse_query(&packet), Err(WireError::Truncated));

        let mut packet = query_packet(1, "example.org.", TYPE_A);
        packet[DNS_HEADER_SIZE] = 0xC0;
        assert_eq!(parse_query(&packet), Err(WireError::InvalidLabel));
    }

    #[test]
    fn test_build_cname_chain_response() {
        let query = parse_query(&query_packet(0x1234, "a.example.org.", TYPE_A)).unwrap();
        let answers = vec![
            ResourceRecord {
                name: "a.example.org.".into(),
                ttl: 604_800,
                data: RData::Cname("b.example.org.".into()),
            },
            ResourceRecord {
                name: "b.example.org.".into(),
                ttl: 604_800,
                data: RData::A(Ipv4Addr::new(10, 0, 0, 1)),
            },
        ];

        let response = build_response(&query, Rcode::NoError, &answers).unwrap();

        assert_eq!(response[0..2], [0x12, 0x34]); // ID
        let flags = u16_at(&response, 2);
        assert_ne!(flags & FLAG_QR, 0);
        assert_ne!(flags & FLAG_AA, 0);
        assert_ne!(flags & FLAG_RD, 0);
        assert_eq!(flags & 0x000F, 0);
        assert_eq!(u16_at(&response, 6), 2); // ancount

        // The response ends with the A record's address
        assert_eq!(response[response.len() - 4..], [10, 0, 0, 1]);
    }

    #[test]
    fn test_build_txt_splits_long_strings() {
        let query = Query::new("t.example.org.", TYPE_TXT);
        let text = "x".repeat(300);
        let answers = vec![ResourceRecord {
            name: "t.example.org.".into(),
            ttl: 60,
            data: RData::Txt(text),
        }];

        let response = build_response(&query, Rcode::NoError, &answers).unwrap();
        let question_end = DNS_HEADER_SIZE + "t.example.org.".len() + 1 + 4;
        // pointer(2) type(2) class(2) ttl(4) rdlength(2)
        let rdlength = u16_at(&response, question_end + 10) as usize;
        assert_eq!(rdlength, 300 + 2);
        assert_eq!(response[question_end + 12], 255);
        assert_eq!(response[question_end + 12 + 256], 45);
    }

    #[test]
    fn test_error_rcode() {
        let query = Query::new("x.example.org.", 15);
        let response = build_response(&query, Rcode::NotImp, &[]).unwrap();
        assert_eq!(u16_at(&response, 2) & 0x000F, Rcode::NotImp as u16);
        assert_eq!(u16_at(&response, 6), 0);
    }

    #[test]
    fn test_oversized_answer_sets_tc() {
        let query = Query::new("big.example.org.", TYPE_TXT);
        let answers = vec![ResourceRecord {
            name: "big.example.org.".into(),
            ttl: 60,
            data: RData::Txt("y".repeat(1000)),
        }];

        let response = build_response(&query, Rcode::NoError, &answers).unwrap();
        assert!(response.len() <= DNS_MAX_PACKET_SIZE);
        assert_ne!(u16_at(&response, 2) & FLAG_TC, 0);
        assert_eq!(u16_at(&response, 6), 0);
    }

    #[test]
    fn test_format_error_keeps_id_and_rd() {
        let mut packet = query_packet(0x1234, "example.org.", TYPE_A);
        packet.truncate(DNS_HEADER_SIZE + 3);
        assert!(parse_query(&packet).is_err());

        let response = build_format_error(&packet).unwrap();
        assert_eq!(response.len(), DNS_HEADER_SIZE);
        assert_eq!(u16_at(&response, 0), 0x1234);
        assert_eq!(u16_at(&response, 2) & 0x000F, Rcode::FormErr as u16);
        assert_ne!(u16_at(&response, 2) & FLAG_QR, 0);
        assert_ne!(u16_at(&response, 2) & FLAG_RD, 0);
        assert_eq!(u16_at(&response, 4), 0); // qdcount

        assert!(build_format_error(&packet[..5]).is_none());
        packet[2] |= 0x80; // QR
        assert!(build_format_error(&packet).is_none());
    }
}
