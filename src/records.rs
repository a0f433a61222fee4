//! Record Store
//!
//! Writes and deletes DNS records as etcd keys. Batches are applied in
//! order and stop at the first failure; whatever was applied before the
//! failure stays applied.
//!
//! All mutations on one `RecordStore` are serialised by a single lock so
//! two batches never interleave. Lookups do not take this lock.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::naming::{in_zone, KeyScheme};
use crate::store::{KvStore, StoreError};
use crate::types::{Record, RecordSpec, RecordType};

/// Record writer bound to one store connection and key scheme
pub struct RecordStore {
    store: Arc<dyn KvStore>,
    scheme: KeyScheme,

    /// Serialises append / delete batches
    write_lock: Mutex<()>,
}

impl RecordStore {
    pub fn new(store: Arc<dyn KvStore>, scheme: KeyScheme) -> Self {
        Self {
            store,
            scheme,
            write_lock: Mutex::new(()),
        }
    }

    /// Write every record of `specs` into `zone`.
    ///
    /// Records with a TTL get a fresh lease each, so the store removes
    /// them on its own once the TTL runs out.
    pub async fn append(&self, zone: &str, specs: &[RecordSpec]) -> Result<Vec<Record>, RecordError> {
        let _guard = self.write_lock.lock().await;

        let mut accepted = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            let record = self.parse(zone, index, spec)?;
            let key = self.scheme.encode(zone, &record.name, record.rtype);

            let lease = match record.ttl {
                Some(ttl) => {
                    let lease = self
                        .store
                        .grant_lease(ttl)
                        .await
                        .map_err(|source| RecordError::Lease { index, ttl_secs: ttl.as_secs(), source })?;
                    Some(lease)
                }
                None => None,
            };

            self.store
                .put(&key, &record.value, lease)
                .await
                .map_err(|source| RecordError::StoreWrite { index, key: key.clone(), source })?;

            match lease {
                Some(lease) => debug!("put {} = {:?} (lease {})", key, record.value, lease),
                None => debug!("put {} = {:?}", key, record.value),
            }
            accepted.push(record);
        }

        info!("📝 Appended {} records to {}", accepted.len(), zone);
        Ok(accepted)
    }

    /// Delete every record of `specs` from `zone`.
    ///
    /// Missing keys are not an error. Returns the records processed before
    /// the batch finished or failed.
    pub async fn delete(&self, zone: &str, specs: &[RecordSpec]) -> Result<Vec<Record>, RecordError> {
        let _guard = self.write_lock.lock().await;

        let mut deleted = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            let record = self.parse(zone, index, spec)?;
            let key = self.scheme.encode(zone, &record.name, record.rtype);

            let removed = self
                .store
                .delete(&key)
                .await
                .map_err(|source| RecordError::StoreDelete { index, key: key.clone(), source })?;

            debug!("delete {} ({} removed)", key, removed);
            deleted.push(record);
        }

        info!("🗑️  Deleted {} records from {}", deleted.len(), zone);
        Ok(deleted)
    }

    fn parse(&self, zone: &str, index: usize, spec: &RecordSpec) -> Result<Record, RecordError> {
        let record = Record::parse(spec).map_err(|reason| RecordError::Malformed { index, reason })?;

        // Lookups lower-case the whole key, so nothing else could be found
        if record.name.chars().any(|c| c.is_uppercase()) {
            return Err(RecordError::Malformed {
                index,
                reason: format!("record name {:?} must be lower case", record.name),
            });
        }

        if record.rtype == RecordType::Cname && in_zone(&record.value, zone) {
            return Err(RecordError::Malformed {
                index,
                reason: format!(
                    "CNAME target {:?} already names the zone {:?}, give it relative to the zone",
                    record.value, zone
                ),
            });
        }

        if record.name.contains(self.scheme.separator()) {
            return Err(RecordError::Malformed {
                index,
                reason: format!(
                    "record name {:?} contains the key separator {:?}",
                    record.name,
                    self.scheme.separator()
                ),
            });
        }

        Ok(record)
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Batch failure; `index` is the position of the offending record
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("record {index}: malformed record: {reason}")]
    Malformed { index: usize, reason: String },

    #[error("record {index}: could not grant {ttl_secs}s lease: {source}")]
    Lease {
        index: usize,
        ttl_secs: u64,
        #[source]
        source: StoreError,
    },

    #[error("record {index}: could not write {key}: {source}")]
    StoreWrite {
        index: usize,
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("record {index}: could not delete {key}: {source}")]
    StoreDelete {
        index: usize,
        key: String,
        #[source]
        source: StoreError,
    },
}

impl RecordError {
    /// Position of the failing record within its batch
    pub fn index(&self) -> usize {
        match self {
            RecordError::Malformed { index, .. }
            | RecordError::Lease { index, .. }
            | RecordError::StoreWrite { index, .. }
            | RecordError::StoreDelete { index, .. } => *index,
        }
    }
}
