//! Key-Value Store Module
//!
//! The rest of the service talks to etcd only through [`KvStore`]:
//!
//! - plain KV: prefix scan, put (optionally bound to a lease), delete
//! - leases: grant / revoke
//! - sessions: a lease kept alive in the background
//! - elections: campaign / resign on a named election
//!
//! [`EtcdStore`] is the production implementation, [`MemoryStore`] an
//! in-process one with the same contract.

pub mod etcd;
pub mod memory;

pub use etcd::{spawn_endpoint_refresh, EndpointSync, EtcdStore, Health};
pub use memory::MemoryStore;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Store-issued lease identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseId(pub i64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// One entry of a range query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

/// Ownership proof for an election, returned by a successful campaign
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderKey {
    /// Election name
    pub name: String,

    /// Key holding this candidate's proposal
    pub key: String,

    /// Create revision of `key`
    pub rev: i64,

    /// Session lease the key is bound to
    pub lease: LeaseId,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Operations the resolver, record store and election engine need
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// All entries whose key starts with `prefix`, ordered by key
    async fn get_prefix(&self, prefix: &str) -> StoreResult<Vec<KeyValue>>;

    /// Write `value` at `key`, attached to `lease` when given
    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> StoreResult<()>;

    /// Delete `key`, returning how many keys were removed (0 or 1)
    async fn delete(&self, key: &str) -> StoreResult<u64>;

    /// Grant a fresh lease expiring after `ttl`
    async fn grant_lease(&self, ttl: Duration) -> StoreResult<LeaseId>;

    /// Revoke a lease, deleting every key attached to it
    async fn revoke_lease(&self, lease: LeaseId) -> StoreResult<()>;

    /// Grant a lease and keep it alive until the session is dropped or closed
    async fn open_session(&self, ttl: Duration) -> StoreResult<Session>;

    /// Wait until `proposal` (bound to `lease`) owns the election `name`
    async fn campaign(&self, name: &str, proposal: &str, lease: LeaseId) -> StoreResult<LeaderKey>;

    /// Give up ownership held through `leader`
    async fn resign(&self, leader: &LeaderKey) -> StoreResult<()>;
}

// =============================================================================
// SESSION
// =============================================================================

/// Liveness session backed by a kept-alive lease
///
/// `expired` fires when the lease could not be kept alive; `stop` ends the
/// keep-alive loop. Dropping the session stops keep-alives, the lease then
/// runs out on its own.
#[derive(Debug)]
pub struct Session {
    lease: LeaseId,
    ttl: Duration,
    expired: CancellationToken,
    stop: CancellationToken,
}

impl Session {
    pub fn new(lease: LeaseId, ttl: Duration, expired: CancellationToken, stop: CancellationToken) -> Self {
        Self {
            lease,
            ttl,
            expired,
            stop,
        }
    }

    pub fn lease(&self) -> LeaseId {
        self.lease
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Resolves once the session has expired
    pub async fn done(&self) {
        self.expired.cancelled().await
    }

    pub fn is_expired(&self) -> bool {
        self.expired.is_cancelled()
    }

    /// Stop keep-alives and revoke the lease
    pub async fn close(self, store: &dyn KvStore) -> StoreResult<()> {
        self.stop.cancel();
        if self.is_expired() {
            return Ok(());
        }
        store.revoke_lease(self.lease).await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("etcd request failed: {0}")]
    Etcd(#[from] etcd_client::Error),

    #[error("could not load TLS material from {path:?}: {source}")]
    TlsMaterial {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store is unavailable")]
    Unavailable,

    #[error("lease {0} not found")]
    LeaseNotFound(LeaseId),

    #[error("campaign response carried no leader key")]
    MissingLeader,

    #[error("key or value is not valid UTF-8")]
    InvalidUtf8,

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}
