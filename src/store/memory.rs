//! In-Memory Store
//!
//! A single-process stand-in for etcd implementing the same contract:
//!
//! - keys are kept ordered, prefix scans return them in key order
//! - revoking (or outliving) a lease deletes every key attached to it
//! - an election is owned by the candidate key with the lowest create revision
//! - a dropped session stops "keeping alive" and expires after its TTL
//!
//! Used by the test-suite and by `--in-memory` development runs.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{KeyValue, KvStore, LeaderKey, LeaseId, Session, StoreError, StoreResult};

/// First lease id handed out
const FIRST_LEASE_ID: i64 = 0x694d_0000;

/// In-process store, cheap to clone (all clones share state)
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,

    /// Woken on every mutation so campaigners re-check ownership
    changed: Arc<Notify>,
}

#[derive(Default)]
struct State {
    revision: i64,
    next_lease: i64,
    kvs: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, LeaseState>,
    unavailable: bool,
    sessions_opened: usize,
}

struct Entry {
    value: String,
    create_rev: i64,
    lease: Option<LeaseId>,
}

struct LeaseState {
    /// `None` while kept alive
    expires_at: Option<Instant>,

    /// Fired when a session lease goes away
    session: Option<CancellationToken>,
}

impl State {
    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn purge_expired(&mut self) -> bool {
        let now = Instant::now();
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, l)| l.expires_at.map_or(false, |at| at <= now))
            .map(|(id, _)| *id)
            .collect();

        let any = !expired.is_empty();
        for lease in expired {
            debug!("lease {} expired", lease);
            self.revoke(lease);
        }
        any
    }

    fn revoke(&mut self, lease: LeaseId) -> bool {
        let Some(state) = self.leases.remove(&lease) else {
            return false;
        };
        self.kvs.retain(|_, entry| entry.lease != Some(lease));
        self.revision += 1;
        if let Some(token) = state.session {
            token.cancel();
        }
        true
    }

    fn grant(&mut self, expires_at: Option<Instant>, session: Option<CancellationToken>) -> LeaseId {
        if self.next_lease == 0 {
            self.next_lease = FIRST_LEASE_ID;
        }
        let id = LeaseId(self.next_lease);
        self.next_lease += 1;
        self.leases.insert(id, LeaseState { expires_at, session });
        id
    }

    fn put(&mut self, key: &str, value: &str, lease: Option<LeaseId>) -> StoreResult<i64> {
        if let Some(lease) = lease {
            if !self.leases.contains_key(&lease) {
                return Err(StoreError::LeaseNotFound(lease));
            }
        }

        self.revision += 1;
        let revision = self.revision;
        let entry = self.kvs.entry(key.to_string()).or_insert(Entry {
            value: String::new(),
            create_rev: revision,
            lease: None,
        });
        entry.value = value.to_string();
        entry.lease = lease;
        Ok(entry.create_rev)
    }

    /// Candidate key with the lowest create revision under `name/`
    fn election_owner(&self, name: &str) -> Option<(&String, &Entry)> {
        let prefix = format!("{}/", name);
        self.kvs
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .min_by_key(|(_, entry)| entry.create_rev)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test thread panicked mid-update
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every subsequent operation fail with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Drop a session's lease as if keep-alives had stopped reaching the store
    pub fn expire_session(&self, lease: LeaseId) -> bool {
        let revoked = self.lock().revoke(lease);
        self.changed.notify_waiters();
        revoked
    }

    /// Number of sessions ever opened
    pub fn sessions_opened(&self) -> usize {
        self.lock().sessions_opened
    }

    /// Current value at `key`
    pub fn value(&self, key: &str) -> Option<String> {
        let mut state = self.lock();
        state.purge_expired();
        state.kvs.get(key).map(|e| e.value.clone())
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let mut state = self.lock();
        state.purge_expired();
        state.kvs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live leases (sessions included)
    pub fn lease_count(&self) -> usize {
        let mut state = self.lock();
        state.purge_expired();
        state.leases.len()
    }

    fn withdraw_candidate(&self, key: &str, rev: i64) {
        {
            let mut state = self.lock();
            if state.kvs.get(key).map(|e| e.create_rev) == Some(rev) {
                state.kvs.remove(key);
                state.revision += 1;
            }
        }
        self.changed.notify_waiters();
    }
}

/// Removes a candidate key when a campaign is abandoned before winning
struct CandidateGuard<'a> {
    store: &'a MemoryStore,
    key: String,
    rev: i64,
    armed: bool,
}

impl Drop for CandidateGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.store.withdraw_candidate(&self.key, self.rev);
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get_prefix(&self, prefix: &str) -> StoreResult<Vec<KeyValue>> {
        let mut state = self.lock();
        state.check_available()?;
        if state.purge_expired() {
            self.changed.notify_waiters();
        }

        Ok(state
            .kvs
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| KeyValue {
                key: key.clone(),
                value: entry.value.clone(),
            })
            .collect())
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> StoreResult<()> {
        {
            let mut state = self.lock();
            state.check_available()?;
            state.purge_expired();
            state.put(key, value, lease)?;
        }
        self.changed.notify_waiters();
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        let deleted = {
            let mut state = self.lock();
            state.check_available()?;
            state.purge_expired();
            match state.kvs.remove(key) {
                Some(_) => {
                    state.revision += 1;
                    1
                }
                None => 0,
            }
        };
        self.changed.notify_waiters();
        Ok(deleted)
    }

    async fn grant_lease(&self, ttl: Duration) -> StoreResult<LeaseId> {
        let mut state = self.lock();
        state.check_available()?;
        Ok(state.grant(Some(Instant::now() + ttl), None))
    }

    async fn revoke_lease(&self, lease: LeaseId) -> StoreResult<()> {
        let revoked = {
            let mut state = self.lock();
            state.check_available()?;
            state.purge_expired();
            state.revoke(lease)
        };
        self.changed.notify_waiters();
        if revoked {
            Ok(())
        } else {
            Err(StoreError::LeaseNotFound(lease))
        }
    }

    async fn open_session(&self, ttl: Duration) -> StoreResult<Session> {
        let expired = CancellationToken::new();
        let stop = CancellationToken::new();

        let lease = {
            let mut state = self.lock();
            state.check_available()?;
            state.sessions_opened += 1;
            state.grant(None, Some(expired.clone()))
        };

        // Once keep-alives stop, the lease lives for one more TTL
        let store = self.clone();
        let stopped = stop.clone();
        let gone = expired.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = stopped.cancelled() => {}
                _ = gone.cancelled() => return,
            }
            tokio::select! {
                _ = tokio::time::sleep(ttl) => {
                    store.expire_session(lease);
                }
                _ = gone.cancelled() => {}
            }
        });

        Ok(Session::new(lease, ttl, expired, stop))
    }

    async fn campaign(&self, name: &str, proposal: &str, lease: LeaseId) -> StoreResult<LeaderKey> {
        let key = format!("{}/{:x}", name, lease.0);

        let rev = {
            let mut state = self.lock();
            state.check_available()?;
            state.purge_expired();
            state.put(&key, proposal, Some(lease))?
        };
        self.changed.notify_waiters();

        let mut guard = CandidateGuard {
            store: self,
            key: key.clone(),
            rev,
            armed: true,
        };

        loop {
            let notified = self.changed.notified();
            {
                let mut state = self.lock();
                state.purge_expired();

                if state.kvs.get(&key).map(|e| e.create_rev) != Some(rev) {
                    // Our session went away while waiting
                    guard.armed = false;
                    return Err(StoreError::LeaseNotFound(lease));
                }

                if let Some((owner, _)) = state.election_owner(name) {
                    if *owner == key {
                        guard.armed = false;
                        return Ok(LeaderKey {
                            name: name.to_string(),
                            key,
                            rev,
                            lease,
                        });
                    }
                }
            }
            notified.await;
        }
    }

    async fn resign(&self, leader: &LeaderKey) -> StoreResult<()> {
        {
            let mut state = self.lock();
            state.check_available()?;
            if state.kvs.get(&leader.key).map(|e| e.create_rev) == Some(leader.rev) {
                state.kvs.remove(&leader.key);
                state.revision += 1;
            }
        }
        self.changed.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prefix_scan_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        store.put("dns/b", "2", None).await.unwrap();
        store.put("dns/a", "1", None).await.unwrap();
        store.put("dnsx/a", "x", None).await.unwrap();

        let kvs = store.get_prefix("dns/").await.unwrap();
        let keys: Vec<_> = kvs.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys, vec!["dns/a", "dns/b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_expiry_removes_keys() {
        let store = MemoryStore::new();
        let lease = store.grant_lease(Duration::from_secs(5)).await.unwrap();
        store.put("k", "v", Some(lease)).await.unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(store.value("k").as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.value("k"), None);
        assert_eq!(store.lease_count(), 0);
    }

    #[tokio::test]
    async fn test_put_with_unknown_lease_fails() {
        let store = MemoryStore::new();
        let err = store.put("k", "v", Some(LeaseId(42))).await.unwrap_err();
        assert!(matches!(err, StoreError::LeaseNotFound(LeaseId(42))));
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.get_prefix("").await, Err(StoreError::Unavailable)));
        store.set_unavailable(false);
        assert!(store.get_prefix("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_candidate_owns_election() {
        let store = MemoryStore::new();
        let s1 = store.open_session(Duration::from_secs(60)).await.unwrap();
        let s2 = store.open_session(Duration::from_secs(60)).await.unwrap();

        let leader = store.campaign("election", "one", s1.lease()).await.unwrap();
        assert_eq!(leader.name, "election");

        let contender = store.clone();
        let lease2 = s2.lease();
        let second = tokio::spawn(async move { contender.campaign("election", "two", lease2).await });

        tokio::task::yield_now().await;
        assert!(!second.is_finished());

        store.resign(&leader).await.unwrap();
        let leader2 = second.await.unwrap().unwrap();
        assert_eq!(leader2.lease, lease2);
        assert_eq!(store.value(&leader2.key).as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_abandoned_campaign_withdraws_candidate() {
        let store = MemoryStore::new();
        let s1 = store.open_session(Duration::from_secs(60)).await.unwrap();
        let s2 = store.open_session(Duration::from_secs(60)).await.unwrap();
        let _leader = store.campaign("e", "one", s1.lease()).await.unwrap();

        let pending = tokio::time::timeout(
            Duration::from_millis(10),
            store.campaign("e", "two", s2.lease()),
        )
        .await;
        assert!(pending.is_err());
        assert_eq!(store.get_prefix("e/").await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_session_expires_after_ttl() {
        let store = MemoryStore::new();
        let session = store.open_session(Duration::from_secs(10)).await.unwrap();
        let lease = session.lease();
        store.put("owned", "x", Some(lease)).await.unwrap();

        drop(session);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.value("owned").as_deref(), Some("x"));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.value("owned"), None);
    }

    #[tokio::test]
    async fn test_expire_session_fires_done() {
        let store = MemoryStore::new();
        let session = store.open_session(Duration::from_secs(60)).await.unwrap();
        assert!(!session.is_expired());

        assert!(store.expire_session(session.lease()));
        session.done().await;
        assert!(session.is_expired());
    }
}
