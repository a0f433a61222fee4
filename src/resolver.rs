//! Resolver
//!
//! Answers one name with one prefix scan. A name may hold exactly one
//! record; the record type is whatever follows the scan prefix in the
//! matched key. CNAME targets are returned, not chased.

use std::sync::Arc;
use tracing::debug;

use crate::naming::{relative_name, KeyScheme};
use crate::store::{KvStore, StoreError};
use crate::types::{Lookup, RecordType};

/// Read side of the etcd record layout
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn KvStore>,
    scheme: KeyScheme,
}

impl Resolver {
    pub fn new(store: Arc<dyn KvStore>, scheme: KeyScheme) -> Self {
        Self { store, scheme }
    }

    /// Resolve `qname` inside `zone`
    pub async fn lookup(&self, qname: &str, zone: &str) -> Result<Lookup, LookupError> {
        let name = relative_name(qname, zone);
        let prefix = self.scheme.scan_prefix(zone, &name);

        let kvs = self
            .store
            .get_prefix(&prefix)
            .await
            .map_err(|source| LookupError::StoreRead { prefix: prefix.clone(), source })?;

        debug!("scan prefix {}: {} results", prefix, kvs.len());

        let kv = match kvs.as_slice() {
            [kv] => kv,
            _ => {
                return Err(LookupError::AmbiguousOrMissing {
                    prefix,
                    count: kvs.len(),
                })
            }
        };

        let suffix = kv.key.strip_prefix(prefix.as_str()).unwrap_or(kv.key.as_str());
        let rtype = match suffix {
            "A" => RecordType::A,
            "CNAME" => RecordType::Cname,
            "TXT" => RecordType::Txt,
            other => return Err(LookupError::UnsupportedRecordType(other.to_string())),
        };

        let value = match rtype {
            RecordType::Cname => format!("{}.{}", kv.value, zone),
            _ => kv.value.clone(),
        };

        debug!("{} (@ {}), key {}: {:?} (type {})", qname, prefix, kv.key, value, rtype);

        Ok(Lookup { value, rtype })
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("could not read {prefix}: {source}")]
    StoreRead {
        prefix: String,
        #[source]
        source: StoreError,
    },

    #[error("expected exactly one record under {prefix}, found {count}")]
    AmbiguousOrMissing { prefix: String, count: usize },

    #[error("unsupported record type: {0}")]
    UnsupportedRecordType(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn resolver_with(entries: &[(&str, &str)]) -> (MemoryStore, Resolver) {
        let store = MemoryStore::new();
        for (key, value) in entries {
            store.put(key, value, None).await.unwrap();
        }
        let resolver = Resolver::new(Arc::new(store.clone()), KeyScheme::new("dns", "/"));
        (store, resolver)
    }

    #[tokio::test]
    async fn test_lookup_a_record() {
        let (_, resolver) = resolver_with(&[("dns/example.org/www/A", "10.0.0.1")]).await;

        let found = resolver.lookup("www.example.org.", "example.org.").await.unwrap();
        assert_eq!(found, Lookup { value: "10.0.0.1".into(), rtype: RecordType::A });
    }

    #[tokio::test]
    async fn test_lookup_is_case_insensitive() {
        let (_, resolver) = resolver_with(&[("dns/example.org/www/A", "10.0.0.1")]).await;

        let found = resolver.lookup("WWW.Example.ORG.", "example.org.").await.unwrap();
        assert_eq!(found.value, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_lookup_cname_is_qualified_not_chased() {
        let (_, resolver) = resolver_with(&[
            ("dns/example/a/CNAME", "b"),
            ("dns/example/b/A", "10.0.0.1"),
        ])
        .await;

        let found = resolver.lookup("a.example", "example").await.unwrap();
        assert_eq!(found, Lookup { value: "b.example".into(), rtype: RecordType::Cname });
    }

    #[tokio::test]
    async fn test_lookup_txt_unmodified() {
        let (_, resolver) = resolver_with(&[("dns/example.org//TXT", " v=spf1 include:x ~all ")]).await;

        let found = resolver.lookup("example.org.", "example.org.").await.unwrap();
        assert_eq!(found.rtype, RecordType::Txt);
        assert_eq!(found.value, " v=spf1 include:x ~all ");
    }

    #[tokio::test]
    async fn test_lookup_missing() {
        let (_, resolver) = resolver_with(&[("dns/example.org/www/A", "10.0.0.1")]).await;

        let err = resolver.lookup("mail.example.org.", "example.org.").await.unwrap_err();
        assert!(matches!(err, LookupError::AmbiguousOrMissing { count: 0, .. }));
    }

    #[tokio::test]
    async fn test_lookup_two_types_is_ambiguous() {
        let (_, resolver) = resolver_with(&[
            ("dns/example.org/www/A", "10.0.0.1"),
            ("dns/example.org/www/TXT", "hello"),
        ])
        .await;

        let err = resolver.lookup("www.example.org.", "example.org.").await.unwrap_err();
        assert!(matches!(err, LookupError::AmbiguousOrMissing { count: 2, .. }));
    }

    #[tokio::test]
    async fn test_lookup_unsupported_stored_type() {
        let (_, resolver) = resolver_with(&[("dns/example.org/mail/MX", "10 mx")]).await;

        let err = resolver.lookup("mail.example.org.", "example.org.").await.unwrap_err();
        assert!(matches!(err, LookupError::UnsupportedRecordType(ref t) if t == "MX"));
    }

    #[tokio::test]
    async fn test_lookup_store_failure() {
        let (store, resolver) = resolver_with(&[]).await;
        store.set_unavailable(true);

        let err = resolver.lookup("www.example.org.", "example.org.").await.unwrap_err();
        assert!(matches!(err, LookupError::StoreRead { .. }));
    }

    #[tokio::test]
    async fn test_lookup_is_idempotent() {
        let (_, resolver) = resolver_with(&[("dns/example.org/www/A", "10.0.0.1")]).await;

        let first = resolver.lookup("www.example.org.", "example.org.").await.unwrap();
        let second = resolver.lookup("www.example.org.", "example.org.").await.unwrap();
        assert_eq!(first, second);
    }
}
