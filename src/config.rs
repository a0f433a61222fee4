//! Service Configuration
//!
//! Static configuration loaded once at startup from a TOML file, with
//! CLI overrides applied on top. Nothing here is reloaded at runtime.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the etcd DNS service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdDnsConfig {
    // === DNS ===

    /// Zone this instance is authoritative for (e.g. "example.org.")
    pub zone: String,

    /// Port for the UDP DNS listener
    pub dns_port: u16,

    /// TTL placed on every answer record (seconds)
    pub answer_ttl_secs: u32,

    // === HTTP API ===

    /// Port for the provisioning / metrics API
    pub api_port: u16,

    /// etcd connection and key naming
    pub etcd: EtcdConfig,

    /// Leader election gating the provisioning API
    pub election: ElectionSettings,

    /// Serve from a process-local store instead of etcd (development)
    pub in_memory: bool,
}

/// etcd connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    /// Client endpoints, e.g. "https://10.0.0.1:2379"
    pub endpoints: Vec<String>,

    /// CA bundle (PEM)
    pub ca_file: Option<PathBuf>,

    /// Client certificate (PEM)
    pub cert_file: Option<PathBuf>,

    /// Client private key (PEM)
    pub key_file: Option<PathBuf>,

    /// First segment of every record key
    pub prefix: String,

    /// Separator placed between key segments
    pub separator: String,

    /// Connect timeout (seconds)
    pub dial_timeout_secs: u64,

    /// Interval between endpoint list refreshes (seconds)
    pub sync_interval_secs: u64,

    /// Upper bound for one endpoint refresh (seconds)
    pub sync_timeout_secs: u64,
}

/// Leader election settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionSettings {
    /// Campaign for leadership and only accept writes while leading
    pub enabled: bool,

    /// Election prefix shared by all instances
    pub name: String,

    /// Value published while campaigning / leading (usually the host name)
    pub proposal: String,

    /// TTL of the liveness session (seconds)
    pub session_ttl_secs: u64,

    /// Delay before campaigning again after losing the session (seconds)
    pub retry_delay_secs: u64,
}

/// TLS material paths, present only when all three files are configured
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl Default for EtcdDnsConfig {
    fn default() -> Self {
        Self {
            zone: "example.org.".to_string(),
            dns_port: 5353, // Use 53 in production with proper permissions
            answer_ttl_secs: 604_800, // 1 week
            api_port: 8080,
            etcd: EtcdConfig::default(),
            election: ElectionSettings::default(),
            in_memory: false,
        }
    }
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            ca_file: None,
            cert_file: None,
            key_file: None,
            prefix: "dns".to_string(),
            separator: "/".to_string(),
            dial_timeout_secs: 5,
            sync_interval_secs: 60,
            sync_timeout_secs: 30,
        }
    }
}

impl Default for ElectionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            name: "etcd-dns/leader".to_string(),
            proposal: String::new(),
            session_ttl_secs: 60,
            retry_delay_secs: 5,
        }
    }
}

impl EtcdDnsConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    // Builder-style methods for CLI overrides

    pub fn with_zone(mut self, zone: Option<String>) -> Self {
        if let Some(zone) = zone {
            self.zone = zone;
        }
        self
    }

    pub fn with_dns_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.dns_port = port;
        }
        self
    }

    pub fn with_api_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.api_port = port;
        }
        self
    }

    pub fn with_in_memory(mut self, in_memory: bool) -> Self {
        self.in_memory |= in_memory;
        self
    }

    /// Zone as a lower-case FQDN
    pub fn normalized_zone(&self) -> String {
        let zone = self.zone.trim().to_lowercase();
        if zone.ends_with('.') {
            zone
        } else {
            format!("{}.", zone)
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.zone.trim().trim_end_matches('.').is_empty() {
            return Err(ConfigError::Invalid("zone must be set".into()));
        }

        if !self.in_memory && self.etcd.endpoints.is_empty() {
            return Err(ConfigError::Invalid("at least one etcd endpoint is required".into()));
        }

        if self.etcd.separator.is_empty() {
            return Err(ConfigError::Invalid("key separator must not be empty".into()));
        }

        // Zones and names are dotted, a dot separator makes keys ambiguous
        if self.etcd.separator.contains('.') {
            return Err(ConfigError::Invalid(format!(
                "key separator {:?} must not contain '.'",
                self.etcd.separator
            )));
        }

        // The zone is one key segment; the prefix is stripped whole when decoding
        if self.normalized_zone().contains(self.etcd.separator.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "zone {:?} must not contain the key separator {:?}",
                self.zone, self.etcd.separator
            )));
        }

        if self.etcd.sync_interval_secs == 0 || self.etcd.sync_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "sync_interval_secs and sync_timeout_secs must be greater than zero".into(),
            ));
        }

        self.etcd.tls_files()?;

        if self.election.enabled {
            if self.election.name.is_empty() {
                return Err(ConfigError::Invalid("election.name must be set when elections are enabled".into()));
            }
            if self.election.proposal.is_empty() {
                return Err(ConfigError::Invalid(
                    "election.proposal must be set when elections are enabled".into(),
                ));
            }
            if self.election.session_ttl_secs == 0 {
                return Err(ConfigError::Invalid("election.session_ttl_secs must be greater than zero".into()));
            }
        }

        Ok(())
    }
}

impl EtcdConfig {
    /// TLS files, `None` for plaintext connections.
    ///
    /// Either all three of CA, certificate and key are set or none are.
    pub fn tls_files(&self) -> Result<Option<TlsFiles>, ConfigError> {
        match (&self.ca_file, &self.cert_file, &self.key_file) {
            (None, None, None) => Ok(None),
            (Some(ca), Some(cert), Some(key)) => Ok(Some(TlsFiles {
                ca: ca.clone(),
                cert: cert.clone(),
                key: key.clone(),
            })),
            _ => Err(ConfigError::Invalid(
                "ca_file, cert_file and key_file must be configured together".into(),
            )),
        }
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
