//! Key naming
//!
//! Maps DNS names onto flat etcd keys and back:
//!
//! ```text
//! <prefix><sep><zone><sep><name><sep><type>
//! dns/example.org/www/A
//! ```
//!
//! All type variants of one name share the scan prefix
//! `<prefix><sep><zone><sep><name><sep>`, so a single prefix range query
//! finds them and the type is whatever is left of the key after the prefix.

use crate::types::RecordType;

/// Prefix + separator used to build keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyScheme {
    prefix: String,
    separator: String,
}

/// Components recovered from a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedKey {
    pub zone: String,
    pub name: String,
    pub rtype: String,
}

impl KeyScheme {
    pub fn new(prefix: impl Into<String>, separator: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            separator: separator.into(),
        }
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Full key for one record. The zone is lower-cased, the name is kept as is.
    pub fn encode(&self, zone: &str, name: &str, rtype: RecordType) -> String {
        format!(
            "{}{}",
            self.name_prefix(&zone_segment(zone), name),
            rtype.as_str()
        )
    }

    /// Lower-cased prefix shared by every type variant of `name`
    pub fn scan_prefix(&self, zone: &str, name: &str) -> String {
        self.name_prefix(&zone_segment(zone), name).to_lowercase()
    }

    /// Split a key produced by [`KeyScheme::encode`] into its parts.
    ///
    /// Returns `None` for keys that do not belong to this scheme.
    pub fn decode(&self, key: &str) -> Option<DecodedKey> {
        let sep = self.separator.as_str();
        let rest = key.strip_prefix(self.prefix.as_str())?.strip_prefix(sep)?;
        let (zone, rest) = rest.split_once(sep)?;
        let (name, rtype) = rest.rsplit_once(sep)?;

        Some(DecodedKey {
            zone: zone.to_string(),
            name: name.to_string(),
            rtype: rtype.to_string(),
        })
    }

    fn name_prefix(&self, zone: &str, name: &str) -> String {
        let sep = &self.separator;
        format!("{}{sep}{}{sep}{}{sep}", self.prefix, zone, name)
    }
}

/// Zone as stored in keys: no trailing dot, lower case
pub fn zone_segment(zone: &str) -> String {
    zone.trim_end_matches('.').to_lowercase()
}

/// Query name relative to its zone, without the trailing dot.
///
/// `www.example.org.` in `example.org.` becomes `www`; the apex becomes "".
pub fn relative_name(qname: &str, zone: &str) -> String {
    let qname = qname.trim_end_matches('.');
    let zone = zone.trim_end_matches('.');

    let split = qname.len().saturating_sub(zone.len());
    match (qname.get(..split), qname.get(split..)) {
        (Some(name), Some(suffix)) if suffix.eq_ignore_ascii_case(zone) => {
            name.trim_end_matches('.').to_string()
        }
        _ => qname.to_string(),
    }
}

/// Whether `qname` falls inside `zone` (label aligned, case-insensitive)
pub fn in_zone(qname: &str, zone: &str) -> bool {
    let qname = qname.trim_end_matches('.').to_ascii_lowercase();
    let zone = zone.trim_end_matches('.').to_ascii_lowercase();

    if zone.is_empty() || qname == zone {
        return true;
    }
    qname.ends_with(&format!(".{}", zone))
}
