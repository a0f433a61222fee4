// Allow dead code - store and engine APIs are wider than what the binary wires up
#![allow(dead_code)]

//! etcd DNS Service
//!
//! Serves one DNS zone from records kept in etcd and exposes an HTTP API to
//! provision them. Several instances can share a cluster; with elections
//! enabled only the current leader accepts writes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ETCD DNS                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  DNS Server (5353)      ←── Answers A / CNAME / TXT         │
//! │  HTTP API (8080)        ←── Record provisioning, metrics    │
//! │  Endpoint Refresh       ←── Follows etcd cluster membership │
//! │  Election               ←── Gates writes to one leader      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod api;
mod config;
mod dns;
mod election;
mod naming;
mod records;
mod resolver;
mod store;
mod types;

#[cfg(test)]
mod tests;

use api::{ApiState, Metrics};
use config::{ElectionSettings, EtcdDnsConfig};
use dns::{Chain, EtcdPlugin};
use election::{CampaignOptions, Election};
use naming::KeyScheme;
use records::RecordStore;
use resolver::Resolver;
use store::{EtcdStore, Health, KvStore, MemoryStore};

/// Time allowed for resigning leadership on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// etcd DNS - DNS resolver backed by etcd
#[derive(Parser, Debug)]
#[command(name = "etcd-dns")]
#[command(version)]
#[command(about = "DNS resolver serving records from etcd", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "etcd-dns.toml")]
    config: PathBuf,

    /// Zone to serve, overrides the config file
    #[arg(long)]
    zone: Option<String>,

    /// DNS server port (requires root or CAP_NET_BIND_SERVICE for port 53)
    #[arg(long)]
    dns_port: Option<u16>,

    /// HTTP API port
    #[arg(long)]
    api_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Keep records in process memory instead of etcd
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .init();

    info!("🌐 etcd DNS v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = if args.config.exists() {
        EtcdDnsConfig::load(&args.config)?
    } else {
        warn!("Config file not found, using defaults");
        EtcdDnsConfig::default()
    };

    // Override config with CLI args
    let config = config
        .with_zone(args.zone)
        .with_dns_port(args.dns_port)
        .with_api_port(args.api_port)
        .with_in_memory(args.in_memory);

    config.validate()?;

    let zone = config.normalized_zone();
    info!("⚙️  Configuration:");
    info!("   Zone: {}", zone);
    info!("   DNS port: {}", config.dns_port);
    info!("   API port: {}", config.api_port);
    info!("   Key prefix: {:?}, separator: {:?}", config.etcd.prefix, config.etcd.separator);
    info!("   Elections: {}", if config.election.enabled { "enabled" } else { "disabled" });

    let shutdown = CancellationToken::new();
    let health = Health::new();

    // Connect the store
    let (store, refresh_handle): (Arc<dyn KvStore>, _) = if config.in_memory {
        warn!("Serving from process memory, records are lost on exit");
        (Arc::new(MemoryStore::new()) as Arc<dyn KvStore>, None)
    } else {
        let etcd = EtcdStore::connect(
            &config.etcd.endpoints,
            config.etcd.tls_files()?,
            config.etcd.dial_timeout(),
        )
        .await?;

        let refresh = store::spawn_endpoint_refresh(
            etcd.clone(),
            config.etcd.sync_interval(),
            config.etcd.sync_timeout(),
            health.clone(),
            shutdown.clone(),
        );
        (Arc::new(etcd) as Arc<dyn KvStore>, Some(refresh))
    };

    let scheme = KeyScheme::new(config.etcd.prefix.clone(), config.etcd.separator.clone());
    let metrics = Arc::new(Metrics::new());

    // Leader election
    let (leader, election_handle) = if config.election.enabled {
        let election = Arc::new(Election::new(store.clone()));
        let leader = election.subscribe();
        let handle = tokio::spawn(run_election(election, config.election.clone(), shutdown.clone()));
        (Some(leader), Some(handle))
    } else {
        (None, None)
    };

    // Start services
    let resolver = Resolver::new(store.clone(), scheme.clone());
    let chain = Arc::new(Chain::new().with(Arc::new(EtcdPlugin::new(zone.clone(), resolver, config.answer_ttl_secs))));
    let dns_handle = tokio::spawn(dns::run_dns_server(config.dns_port, chain, metrics.clone()));

    let api_state = Arc::new(ApiState {
        zone,
        records: Arc::new(RecordStore::new(store.clone(), scheme)),
        metrics: metrics.clone(),
        health: health.clone(),
        leader,
    });
    let api_handle = tokio::spawn(api::run_api_server(config.api_port, api_state));

    let refresh = async move {
        match refresh_handle {
            Some(handle) => handle.await,
            None => std::future::pending().await,
        }
    };

    info!("✅ All services started");
    info!("   Press Ctrl+C to shutdown gracefully");

    // Wait for shutdown signal
    let exit = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
            Ok(())
        }
        result = dns_handle => {
            error!("DNS server exited: {:?}", result);
            Err(anyhow::anyhow!("DNS server exited"))
        }
        result = api_handle => {
            error!("HTTP API exited: {:?}", result);
            Err(anyhow::anyhow!("HTTP API exited"))
        }
        result = refresh => match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(anyhow::anyhow!("endpoint refresh task failed: {}", e)),
        },
    };

    // Graceful shutdown: give up leadership before leaving
    shutdown.cancel();
    if let Some(handle) = election_handle {
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Ok(Err(e))) => warn!("election loop ended with error: {}", e),
            Ok(_) => {}
            Err(_) => warn!("leadership not released within {:?}", SHUTDOWN_GRACE),
        }
    }

    info!("👋 etcd DNS shutting down");
    exit
}

/// Campaign until shutdown, starting a new cycle whenever one ends early
async fn run_election(
    election: Arc<Election>,
    settings: ElectionSettings,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let retry_delay = Duration::from_secs(settings.retry_delay_secs);

    loop {
        let options = CampaignOptions::new()
            .election(settings.name.clone())
            .proposal(settings.proposal.clone())
            .session_ttl(Duration::from_secs(settings.session_ttl_secs))
            .on_elected(|_| async {
                info!("✍️  Accepting record writes");
                Ok::<(), election::BoxError>(())
            });

        match election.campaign(&shutdown, options).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_config() => return Err(e.into()),
            Err(e) if shutdown.is_cancelled() => {
                info!("election stopped: {}", e);
                return Ok(());
            }
            Err(e) => warn!("election cycle ended: {}, campaigning again in {:?}", e, retry_delay),
        }

        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep(retry_delay) => {}
        }
    }
}
