//! etcd Store
//!
//! [`KvStore`] on top of `etcd-client`, plus the background task keeping
//! the client's endpoint list in line with the cluster membership.
//!
//! ## Endpoint refresh
//!
//! The member list is re-read every `sync_interval_secs`. A failed refresh
//! is not retried: the health flag goes down and the task ends with the
//! error, which takes the process down so the supervisor can restart it
//! with a clean connection.

use async_trait::async_trait;
use etcd_client::{
    Certificate, Client, ConnectOptions, GetOptions, Identity, PutOptions, ResignOptions, TlsOptions,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{KeyValue, KvStore, LeaderKey, LeaseId, Session, StoreError, StoreResult};
use crate::config::TlsFiles;

/// Bound on the sync performed while connecting
const INITIAL_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// etcd-backed store. Clones share the underlying connection.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,

    /// Endpoints the client currently balances over
    endpoints: Arc<Mutex<BTreeSet<String>>>,
}

impl EtcdStore {
    /// Connect to `endpoints` and run an initial endpoint sync
    pub async fn connect(
        endpoints: &[String],
        tls: Option<TlsFiles>,
        dial_timeout: Duration,
    ) -> StoreResult<Self> {
        let mut options = ConnectOptions::new().with_connect_timeout(dial_timeout);
        if let Some(tls) = tls {
            options = options.with_tls(load_tls(&tls).await?);
        }

        let client = Client::connect(endpoints, Some(options)).await?;
        let store = Self {
            client,
            endpoints: Arc::new(Mutex::new(endpoints.iter().cloned().collect())),
        };

        match tokio::time::timeout(INITIAL_SYNC_TIMEOUT, store.sync_endpoints()).await {
            Ok(result) => {
                let count = result?;
                info!("🔗 Connected to etcd, {} endpoints", count);
            }
            Err(_) => return Err(StoreError::Timeout(INITIAL_SYNC_TIMEOUT)),
        }

        Ok(store)
    }

    fn client(&self) -> Client {
        self.client.clone()
    }
}

async fn load_tls(files: &TlsFiles) -> StoreResult<TlsOptions> {
    let read = |path: std::path::PathBuf| async move {
        tokio::fs::read(&path)
            .await
            .map_err(|source| StoreError::TlsMaterial { path, source })
    };

    let ca = read(files.ca.clone()).await?;
    let cert = read(files.cert.clone()).await?;
    let key = read(files.key.clone()).await?;

    Ok(TlsOptions::new()
        .ca_certificate(Certificate::from_pem(ca))
        .identity(Identity::from_pem(cert, key)))
}

fn utf8(bytes: &[u8]) -> StoreResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| StoreError::InvalidUtf8)
}

#[async_trait]
impl KvStore for EtcdStore {
    async fn get_prefix(&self, prefix: &str) -> StoreResult<Vec<KeyValue>> {
        let resp = self
            .client()
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;

        resp.kvs()
            .iter()
            .map(|kv| {
                Ok(KeyValue {
                    key: utf8(kv.key())?,
                    value: utf8(kv.value())?,
                })
            })
            .collect()
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> StoreResult<()> {
        let options = lease.map(|lease| PutOptions::new().with_lease(lease.0));
        self.client().put(key, value, options).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        let resp = self.client().delete(key, None).await?;
        Ok(resp.deleted().max(0) as u64)
    }

    async fn grant_lease(&self, ttl: Duration) -> StoreResult<LeaseId> {
        let secs = ttl.as_secs().max(1) as i64;
        let resp = self.client().lease_grant(secs, None).await?;
        Ok(LeaseId(resp.id()))
    }

    async fn revoke_lease(&self, lease: LeaseId) -> StoreResult<()> {
        self.client().lease_revoke(lease.0).await?;
        Ok(())
    }

    async fn open_session(&self, ttl: Duration) -> StoreResult<Session> {
        let lease = self.grant_lease(ttl).await?;
        let (mut keeper, mut stream) = self.client().lease_keep_alive(lease.0).await?;

        let expired = CancellationToken::new();
        let stop = CancellationToken::new();

        let gone = expired.clone();
        let stopped = stop.clone();
        let period = (ttl / 3).max(Duration::from_millis(500));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Err(e) = keeper.keep_alive().await {
                    warn!("session {}: keep-alive failed: {}", lease, e);
                    gone.cancel();
                    break;
                }

                match stream.message().await {
                    Ok(Some(resp)) if resp.ttl() > 0 => {
                        debug!("session {}: kept alive, ttl {}s", lease, resp.ttl());
                    }
                    Ok(_) => {
                        warn!("session {}: lease expired", lease);
                        gone.cancel();
                        break;
                    }
                    Err(e) => {
                        warn!("session {}: keep-alive stream failed: {}", lease, e);
                        gone.cancel();
                        break;
                    }
                }
            }
        });

        Ok(Session::new(lease, ttl, expired, stop))
    }

    async fn campaign(&self, name: &str, proposal: &str, lease: LeaseId) -> StoreResult<LeaderKey> {
        let resp = self.client().campaign(name, proposal, lease.0).await?;
        let leader = resp.leader().ok_or(StoreError::MissingLeader)?;

        Ok(LeaderKey {
            name: utf8(leader.name())?,
            key: utf8(leader.key())?,
            rev: leader.rev(),
            lease: LeaseId(leader.lease()),
        })
    }

    async fn resign(&self, leader: &LeaderKey) -> StoreResult<()> {
        let key = etcd_client::LeaderKey::new()
            .with_name(leader.name.as_str())
            .with_key(leader.key.as_str())
            .with_rev(leader.rev)
            .with_lease(leader.lease.0);

        self.client()
            .resign(Some(ResignOptions::new().with_leader(key)))
            .await?;
        Ok(())
    }
}

// =============================================================================
// ENDPOINT REFRESH
// =============================================================================

/// Something whose endpoint list can be re-synced with the cluster
#[async_trait]
pub trait EndpointSync: Send + Sync + 'static {
    /// Reconcile endpoints, returning how many are now in use
    async fn sync_endpoints(&self) -> StoreResult<usize>;
}

#[async_trait]
impl EndpointSync for EtcdStore {
    async fn sync_endpoints(&self) -> StoreResult<usize> {
        let mut client = self.client();
        let resp = client.member_list().await?;

        let advertised: BTreeSet<String> = resp
            .members()
            .iter()
            .flat_map(|member| member.client_urls().iter().cloned())
            .collect();

        let mut known = self.endpoints.lock().await;
        if advertised.is_empty() {
            return Ok(known.len());
        }

        for endpoint in advertised.difference(&known) {
            debug!("adding etcd endpoint {}", endpoint);
            client.add_endpoint(endpoint).await?;
        }
        for endpoint in known.difference(&advertised) {
            debug!("removing etcd endpoint {}", endpoint);
            client.remove_endpoint(endpoint).await?;
        }

        *known = advertised;
        Ok(known.len())
    }
}

/// Process-wide health flag, cleared when the store connection is lost
#[derive(Debug, Clone)]
pub struct Health(Arc<AtomicBool>);

impl Default for Health {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl Health {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_healthy(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn mark_unhealthy(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Refresh endpoints every `interval` until `cancel` fires.
///
/// The task returns the first sync error instead of retrying.
pub fn spawn_endpoint_refresh<S: EndpointSync>(
    store: S,
    interval: Duration,
    timeout: Duration,
    health: Health,
    cancel: CancellationToken,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(interval) => {}
            }

            let result = match tokio::time::timeout(timeout, store.sync_endpoints()).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(timeout)),
            };

            match result {
                Ok(count) => info!("🔄 Synced etcd endpoint list ({} endpoints)", count),
                Err(e) => {
                    error!("failed to sync etcd endpoints: {}", e);
                    health.mark_unhealthy();
                    return Err(anyhow::Error::new(e).context("etcd endpoint sync failed"));
                }
            }
        }
    })
}
