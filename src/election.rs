//! Leader election over etcd sessions.
//!
//! One [`Election::campaign`] call runs exactly one leadership cycle:
//!
//! ```text
//! Idle -> SessionOpen -> Campaigning -> Leading -> Resigning -> Done
//! ```
//!
//! The store guarantees a single owner per election name; this module only
//! sequences session, campaign, callback and resignation. There is no
//! automatic re-campaign, callers decide what to do after a cycle ends.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::store::{KvStore, LeaderKey, Session, StoreError};

/// Default liveness session TTL
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60);

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Invoked once after winning, with the caller's cancellation token
pub type Callback =
    Box<dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>> + Send>;

/// Where a campaign currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignState {
    Idle,
    SessionOpen,
    Campaigning,
    Leading,
    Resigning,
    Done,
}

/// Parameters of one campaign
pub struct CampaignOptions {
    election: String,
    proposal: String,
    callback: Option<Callback>,
    session_ttl: Duration,
}

impl Default for CampaignOptions {
    fn default() -> Self {
        Self {
            election: String::new(),
            proposal: String::new(),
            callback: None,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

impl CampaignOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Election name (key prefix) to contend for
    pub fn election(mut self, name: impl Into<String>) -> Self {
        self.election = name.into();
        self
    }

    /// Value published as this candidate's identity
    pub fn proposal(mut self, proposal: impl Into<String>) -> Self {
        self.proposal = proposal.into();
        self
    }

    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Run `f` once leadership is won
    pub fn on_elected<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.callback = Some(Box::new(move |cancel| Box::pin(f(cancel))));
        self
    }
}

/// Election engine bound to one store connection
pub struct Election {
    store: Arc<dyn KvStore>,
    state: watch::Sender<CampaignState>,
}

impl Election {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        let (state, _) = watch::channel(CampaignState::Idle);
        Self { store, state }
    }

    /// Follow state transitions
    pub fn subscribe(&self) -> watch::Receiver<CampaignState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> CampaignState {
        *self.state.borrow()
    }

    fn enter(&self, next: CampaignState) {
        self.state.send_replace(next);
    }

    /// Contend for leadership, lead until `cancel` fires, then resign.
    ///
    /// Returns `SessionExpired` when leadership was lost to session expiry
    /// rather than given up.
    pub async fn campaign(&self, cancel: &CancellationToken, options: CampaignOptions) -> Result<(), ElectionError> {
        if options.election.is_empty() {
            return Err(ElectionError::PrefixNotSet);
        }
        if options.proposal.is_empty() {
            return Err(ElectionError::ProposalNotSet);
        }

        self.enter(CampaignState::Idle);
        let result = self.run(cancel, options).await;
        self.enter(CampaignState::Done);
        result
    }

    async fn run(&self, cancel: &CancellationToken, options: CampaignOptions) -> Result<(), ElectionError> {
        let CampaignOptions {
            election,
            proposal,
            callback,
            session_ttl,
        } = options;

        let session = tokio::select! {
            session = self.store.open_session(session_ttl) => session,
            _ = cancel.cancelled() => Err(StoreError::Cancelled),
        }
        .map_err(ElectionError::Session)?;
        self.enter(CampaignState::SessionOpen);

        self.enter(CampaignState::Campaigning);
        info!("🗳️  Campaigning for {} as {:?} (session {})", election, proposal, session.lease());

        let won = tokio::select! {
            leader = self.store.campaign(&election, &proposal, session.lease()) => leader,
            _ = cancel.cancelled() => Err(StoreError::Cancelled),
        };
        let leader = match won {
            Ok(leader) => leader,
            Err(e) => {
                self.close_session(session).await;
                return Err(ElectionError::Campaign(e));
            }
        };

        self.enter(CampaignState::Leading);
        info!("👑 Elected leader of {} as {:?}", election, proposal);

        if let Some(callback) = callback {
            if let Err(e) = callback(cancel.clone()).await {
                warn!("leader callback for {} failed: {}", election, e);
                self.enter(CampaignState::Resigning);
                if let Err(re) = self.store.resign(&leader).await {
                    warn!("could not resign {} after callback failure: {}", election, re);
                }
                self.close_session(session).await;
                return Err(ElectionError::Callback(e));
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = session.done() => {
                warn!("session {} expired, leadership of {} lost", session.lease(), election);
                return Err(ElectionError::SessionExpired);
            }
        }

        self.enter(CampaignState::Resigning);
        let resigned = self.resign(&leader).await;
        self.close_session(session).await;
        resigned
    }

    async fn resign(&self, leader: &LeaderKey) -> Result<(), ElectionError> {
        self.store.resign(leader).await.map_err(ElectionError::Resign)?;
        info!("🏳️  Resigned leadership of {}", leader.name);
        Ok(())
    }

    async fn close_session(&self, session: Session) {
        let lease = session.lease();
        if let Err(e) = session.close(self.store.as_ref()).await {
            warn!("could not close session {}: {}", lease, e);
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ElectionError {
    #[error("election prefix must be set")]
    PrefixNotSet,

    #[error("election proposal must be set")]
    ProposalNotSet,

    #[error("error creating concurrency session: {0}")]
    Session(#[source] StoreError),

    #[error("error campaigning for election: {0}")]
    Campaign(#[source] StoreError),

    #[error("error executing callback after winning election: {0}")]
    Callback(#[source] BoxError),

    #[error("session expired")]
    SessionExpired,

    #[error("error resigning from election: {0}")]
    Resign(#[source] StoreError),
}

impl ElectionError {
    /// Setup errors, raised before any store round-trip
    pub fn is_config(&self) -> bool {
        matches!(self, ElectionError::PrefixNotSet | ElectionError::ProposalNotSet)
    }
}
