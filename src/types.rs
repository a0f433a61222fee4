//! Core record types
//!
//! `RecordSpec` is what the provisioning API accepts, `Record` is the
//! validated form everything else works with.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

/// Supported record types. This set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Cname,
    Txt,
}

impl RecordType {
    /// Key suffix and presentation name
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Cname => "CNAME",
            RecordType::Txt => "TXT",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "CNAME" => Ok(RecordType::Cname),
            "TXT" => Ok(RecordType::Txt),
            other => Err(format!("unsupported record type {:?}", other)),
        }
    }
}

/// Record as submitted by a provisioning client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSpec {
    /// Name relative to the zone, `@` for the apex
    pub name: String,

    /// Record type text ("A", "CNAME", "TXT")
    #[serde(rename = "type")]
    pub rtype: String,

    /// IPv4 literal, target name or text
    pub value: String,

    /// Time to live in seconds; absent or zero means no expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

/// Validated DNS record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Name relative to the zone, empty for the apex
    pub name: String,

    pub rtype: RecordType,

    pub value: String,

    /// Lease duration, `None` when the record never expires
    pub ttl: Option<Duration>,
}

impl Record {
    /// Build a record without TTL
    pub fn new(name: impl Into<String>, rtype: RecordType, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rtype,
            value: value.into(),
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = if ttl.is_zero() { None } else { Some(ttl) };
        self
    }

    /// Validate a submitted record
    pub fn parse(spec: &RecordSpec) -> Result<Self, String> {
        let rtype: RecordType = spec.rtype.trim().parse()?;

        let name = match spec.name.trim() {
            "@" => String::new(),
            name => name.trim_end_matches('.').to_string(),
        };
        if name.chars().any(char::is_whitespace) {
            return Err(format!("record name {:?} contains whitespace", spec.name));
        }

        match rtype {
            RecordType::A => {
                spec.value
                    .trim()
                    .parse::<Ipv4Addr>()
                    .map_err(|_| format!("A record value {:?} is not an IPv4 address", spec.value))?;
            }
            RecordType::Cname => {
                let target = spec.value.trim();
                if target.is_empty() || target.chars().any(char::is_whitespace) {
                    return Err(format!("CNAME target {:?} is not a host name", spec.value));
                }
                // Targets are relative to the zone, which lookups append
                if target.ends_with('.') {
                    return Err(format!("CNAME target {:?} must be a bare name, not fully qualified", spec.value));
                }
            }
            RecordType::Txt => {}
        }

        let value = match rtype {
            RecordType::Txt => spec.value.clone(),
            _ => spec.value.trim().to_string(),
        };

        let record = Record::new(name, rtype, value);
        Ok(match spec.ttl {
            Some(secs) => record.with_ttl(Duration::from_secs(secs)),
            None => record,
        })
    }

    /// Convert back into the provisioning representation
    pub fn to_spec(&self) -> RecordSpec {
        RecordSpec {
            name: if self.name.is_empty() { "@".to_string() } else { self.name.clone() },
            rtype: self.rtype.to_string(),
            value: self.value.clone(),
            ttl: self.ttl.map(|ttl| ttl.as_secs()),
        }
    }
}

/// Result of resolving one name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    /// IPv4 literal, fully-qualified CNAME target or TXT data
    pub value: String,

    pub rtype: RecordType,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, rtype: &str, value: &str, ttl: Option<u64>) -> RecordSpec {
        RecordSpec {
            name: name.to_string(),
            rtype: rtype.to_string(),
            value: value.to_string(),
            ttl,
        }
    }

    #[test]
    fn test_record_type_parse() {
        assert_eq!("a".parse::<RecordType>().unwrap(), RecordType::A);
        assert_eq!("CNAME".parse::<RecordType>().unwrap(), RecordType::Cname);
        assert_eq!("Txt".parse::<RecordType>().unwrap(), RecordType::Txt);
        assert!("MX".parse::<RecordType>().is_err());
        assert!("AAAA".parse::<RecordType>().is_err());
    }

    #[test]
    fn test_parse_valid_records() {
        let a = Record::parse(&spec("www", "A", "10.0.0.1", Some(30))).unwrap();
        assert_eq!(a.rtype, RecordType::A);
        assert_eq!(a.ttl, Some(Duration::from_secs(30)));

        let apex = Record::parse(&spec("@", "TXT", "  v=spf1 -all", None)).unwrap();
        assert_eq!(apex.name, "");
        assert_eq!(apex.value, "  v=spf1 -all");

        let zero_ttl = Record::parse(&spec("alias", "CNAME", "www", Some(0))).unwrap();
        assert_eq!(zero_ttl.ttl, None);
    }

    #[test]
    fn test_parse_malformed_records() {
        assert!(Record::parse(&spec("www", "A", "not-an-ip", None)).is_err());
        assert!(Record::parse(&spec("www", "A", "::1", None)).is_err());
        assert!(Record::parse(&spec("www", "CNAME", "", None)).is_err());
        assert!(Record::parse(&spec("www", "CNAME", "web.example.org.", None)).is_err());
        assert!(Record::parse(&spec("www", "MX", "10 mail", None)).is_err());
        assert!(Record::parse(&spec("bad name", "TXT", "x", None)).is_err());
    }

    #[test]
    fn test_spec_json_shape() {
        let json = r#"{"name":"www","type":"A","value":"192.0.2.1","ttl":60}"#;
        let parsed: RecordSpec = serde_json::from_str(json).unwrap();
        let record = Record::parse(&parsed).unwrap();
        assert_eq!(record.to_spec(), parsed);
    }
}
