//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TALLY_SERVER_URL=https://pos.example.com                           │
//! │     TALLY_BRANCH_ID=branch-001                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tally-pos/sync.toml (Linux)                              │
//! │     ~/Library/Application Support/com.tally.pos/sync.toml (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [terminal]
//! branch_id = "branch-001"
//! register_id = "register-01"
//! name = "Front Counter"
//!
//! [server]
//! base_url = "https://pos.example.com/api"
//! api_token = "..."
//! request_timeout_secs = 30
//!
//! [sync]
//! mode = "auto"  # auto | offline
//! batch_size = 50
//! push_interval_secs = 30
//! pull_interval_secs = 300
//! max_retries = 5
//!
//! [checkout]
//! change_to_credit_min_cents = 100
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};
use tally_core::CheckoutPolicy;

// =============================================================================
// Sync Mode
// =============================================================================

/// Whether the terminal talks to the server at all.
///
/// In `Offline` mode the builder keeps recording and queuing; the agent
/// simply never pushes or pulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Push and pull whenever the server is reachable.
    #[default]
    Auto,

    /// Deliberate offline mode.
    Offline,
}

impl SyncMode {
    pub fn is_sync_enabled(&self) -> bool {
        !matches!(self, SyncMode::Offline)
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Auto => write!(f, "auto"),
            SyncMode::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "online" => Ok(SyncMode::Auto),
            "offline" | "disabled" => Ok(SyncMode::Offline),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown sync mode: '{}'. Valid options: auto, offline",
                other
            ))),
        }
    }
}

// =============================================================================
// Terminal Configuration
// =============================================================================

/// Identity of this terminal, sent with every push and pull.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    pub branch_id: String,

    pub register_id: String,

    /// Human-readable terminal name (e.g., "Front Counter").
    #[serde(default = "default_terminal_name")]
    pub name: String,
}

fn default_terminal_name() -> String {
    "POS Terminal".to_string()
}

impl Default for TerminalConfig {
    fn default() -> Self {
        TerminalConfig {
            branch_id: String::new(),
            register_id: String::new(),
            name: default_terminal_name(),
        }
    }
}

// =============================================================================
// Server Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the sync API. Endpoints are resolved relative to it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token issued by the session layer.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Upper bound for one push, pull or resolve call (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            base_url: default_base_url(),
            api_token: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub mode: SyncMode,

    /// Queue items claimed per push.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    #[serde(default = "default_push_interval")]
    pub push_interval_secs: u64,

    #[serde(default = "default_pull_interval")]
    pub pull_interval_secs: u64,

    /// FAILED items at or above this retry count are no longer retried.
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,

    /// PROCESSING items older than this are considered interrupted.
    #[serde(default = "default_stale_processing")]
    pub stale_processing_secs: u64,

    /// Initial backoff (milliseconds) after a failed push.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff (seconds) after repeated failed pushes.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// SYNCED queue rows are deleted after this many days.
    #[serde(default = "default_synced_retention")]
    pub synced_retention_days: i64,
}

fn default_batch_size() -> u32 {
    50
}
fn default_push_interval() -> u64 {
    30
}
fn default_pull_interval() -> u64 {
    300
}
fn default_max_retries() -> i64 {
    5
}
fn default_stale_processing() -> u64 {
    300
}
fn default_initial_backoff() -> u64 {
    1000
}
fn default_max_backoff() -> u64 {
    300
}
fn default_synced_retention() -> i64 {
    7
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            mode: SyncMode::default(),
            batch_size: default_batch_size(),
            push_interval_secs: default_push_interval(),
            pull_interval_secs: default_pull_interval(),
            max_retries: default_max_retries(),
            stale_processing_secs: default_stale_processing(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            synced_retention_days: default_synced_retention(),
        }
    }
}

// =============================================================================
// Checkout Settings
// =============================================================================

/// Settlement rules applied by the offline builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSettings {
    /// Change is turned into store credit only above this amount.
    #[serde(default = "default_change_to_credit_min")]
    pub change_to_credit_min_cents: i64,

    #[serde(default = "default_point_value")]
    pub point_value_cents: i64,

    /// Spend per earned point. 0 disables earning.
    #[serde(default = "default_earn_unit")]
    pub earn_unit_cents: i64,
}

fn default_change_to_credit_min() -> i64 {
    CheckoutPolicy::default().change_to_credit_min_cents
}
fn default_point_value() -> i64 {
    CheckoutPolicy::default().point_value_cents
}
fn default_earn_unit() -> i64 {
    CheckoutPolicy::default().earn_unit_cents
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        CheckoutSettings {
            change_to_credit_min_cents: default_change_to_credit_min(),
            point_value_cents: default_point_value(),
            earn_unit_cents: default_earn_unit(),
        }
    }
}

impl CheckoutSettings {
    pub fn policy(&self) -> CheckoutPolicy {
        CheckoutPolicy {
            change_to_credit_min_cents: self.change_to_credit_min_cents,
            point_value_cents: self.point_value_cents,
            earn_unit_cents: self.earn_unit_cents,
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub terminal: TerminalConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub checkout: CheckoutSettings,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.terminal.branch_id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("terminal.branch_id is required".into()));
        }
        if self.terminal.register_id.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "terminal.register_id is required".into(),
            ));
        }

        let url = self.server_url()?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SyncError::InvalidUrl(format!(
                "Server URL must start with http:// or https://, got: {}",
                self.server.base_url
            )));
        }

        if self.server.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        // A shorter window would fail batches that are still in flight.
        if self.sync.stale_processing_secs <= self.server.request_timeout_secs {
            return Err(SyncError::InvalidConfig(format!(
                "stale_processing_secs ({}) must exceed request_timeout_secs ({})",
                self.sync.stale_processing_secs, self.server.request_timeout_secs
            )));
        }

        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        if self.sync.max_retries < 0 {
            return Err(SyncError::InvalidConfig(
                "max_retries must not be negative".into(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("TALLY_BRANCH_ID") {
            debug!(branch_id = %id, "Overriding branch ID from environment");
            self.terminal.branch_id = id;
        }

        if let Ok(id) = std::env::var("TALLY_REGISTER_ID") {
            self.terminal.register_id = id;
        }

        if let Ok(url) = std::env::var("TALLY_SERVER_URL") {
            debug!(url = %url, "Overriding server URL from environment");
            self.server.base_url = url;
        }

        if let Ok(token) = std::env::var("TALLY_API_TOKEN") {
            self.server.api_token = Some(token);
        }

        if let Ok(mode) = std::env::var("TALLY_SYNC_MODE") {
            match mode.parse() {
                Ok(parsed) => self.sync.mode = parsed,
                Err(_) => warn!(mode = %mode, "Unknown sync mode in environment"),
            }
        }

        if let Ok(size) = std::env::var("TALLY_BATCH_SIZE") {
            if let Ok(n) = size.parse::<u32>() {
                self.sync.batch_size = n;
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tally", "pos")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    /// Default location of the terminal's SQLite file.
    pub fn default_database_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tally", "pos")
            .map(|dirs| dirs.data_dir().join("tally.db"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn branch_id(&self) -> &str {
        &self.terminal.branch_id
    }

    pub fn register_id(&self) -> &str {
        &self.terminal.register_id
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.sync.mode.is_sync_enabled()
    }

    /// Parsed server base URL, always ending with `/` so endpoints join below it.
    pub fn server_url(&self) -> SyncResult<Url> {
        let raw = self.server.base_url.trim();
        if raw.ends_with('/') {
            Ok(Url::parse(raw)?)
        } else {
            Ok(Url::parse(&format!("{}/", raw))?)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn push_interval(&self) -> Duration {
        Duration::from_secs(self.sync.push_interval_secs)
    }

    pub fn pull_interval(&self) -> Duration {
        Duration::from_secs(self.sync.pull_interval_secs)
    }

    pub fn stale_processing(&self) -> Duration {
        Duration::from_secs(self.sync.stale_processing_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.terminal.branch_id = "branch-001".into();
        config.terminal.register_id = "register-01".into();
        config
    }

    #[test]
    fn test_sync_mode_parsing() {
        assert_eq!("auto".parse::<SyncMode>().unwrap(), SyncMode::Auto);
        assert_eq!("online".parse::<SyncMode>().unwrap(), SyncMode::Auto);
        assert_eq!("offline".parse::<SyncMode>().unwrap(), SyncMode::Offline);
        assert!("invalid".parse::<SyncMode>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.sync.mode, SyncMode::Auto);
        assert_eq!(config.sync.batch_size, 50);
        assert_eq!(config.sync.max_retries, 5);
        assert_eq!(config.checkout.policy(), CheckoutPolicy::default());
    }

    #[test]
    fn test_config_validation() {
        assert!(SyncConfig::default().validate().is_err());

        let mut config = valid();
        assert!(config.validate().is_ok());

        config.server.base_url = "ws://localhost:8080".into();
        assert!(config.validate().is_err());

        config.server.base_url = "not a url".into();
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        let mut config = valid();
        config.sync.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stale_window_must_outlast_request_timeout() {
        let mut config = valid();
        config.server.request_timeout_secs = 60;
        config.sync.stale_processing_secs = 60;
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));

        config.sync.stale_processing_secs = 61;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_url_joins_endpoints_below_base() {
        let mut config = valid();
        config.server.base_url = "https://pos.example.com/api".into();
        let url = config.server_url().unwrap().join("sync/push").unwrap();
        assert_eq!(url.as_str(), "https://pos.example.com/api/sync/push");
    }

    #[test]
    fn test_toml_round_trip_keeps_sections() {
        let config = valid();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[terminal]"));
        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("[checkout]"));

        let parsed: SyncConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.terminal.branch_id, "branch-001");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: SyncConfig = toml::from_str(
            r#"
            [terminal]
            branch_id = "b"
            register_id = "r"

            [sync]
            batch_size = 10
            "#,
        )
        .unwrap();
        assert_eq!(parsed.sync.batch_size, 10);
        assert_eq!(parsed.sync.pull_interval_secs, 300);
        assert!(parsed.validate().is_ok());
    }
}
