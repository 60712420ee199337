//! Gateway configuration module
//!
//! Layered sources, later ones win:
//! 1. Built-in defaults
//! 2. Optional TOML file (`ARRAKIS_CONFIG`, default `arrakis.toml`)
//! 3. Environment variables prefixed `ARRAKIS_`, `__` between nested keys
//!    (e.g. `ARRAKIS_HANDSHAKE__URL`)
//!
//! `DISCORD_TOKEN` / `DISCORD_BOT_TOKEN` are accepted when no token is set.

use crate::error::GatewayError;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use twilight_gateway::Intents;

/// Default config file looked up when `ARRAKIS_CONFIG` is unset
pub const DEFAULT_CONFIG_FILE: &str = "arrakis.toml";

/// Deployment profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentProfile {
    /// Public deployment: handshake, startup signal, outward listeners
    #[default]
    Full,
    /// Premium deployment (restricted)
    Premium,
    /// Beta deployment (restricted)
    Beta,
}

impl DeploymentProfile {
    /// Restricted profiles skip the handshake, the startup signal and outward listeners
    pub fn is_restricted(&self) -> bool {
        matches!(self, DeploymentProfile::Premium | DeploymentProfile::Beta)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentProfile::Full => "full",
            DeploymentProfile::Premium => "premium",
            DeploymentProfile::Beta => "beta",
        }
    }
}

/// Remote control-plane handshake
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Base URL of the coordination service
    pub url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: 10_000,
        }
    }
}

impl HandshakeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Best-effort startup signal sent to a Discord webhook
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub webhook_id: Option<u64>,
    pub webhook_token: Option<String>,
    pub timeout_ms: u64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            webhook_id: None,
            webhook_token: None,
            timeout_ms: 5_000,
        }
    }
}

impl SignalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Webhook credentials, when both halves are set
    pub fn webhook(&self) -> Option<(u64, &str)> {
        match (self.webhook_id, self.webhook_token.as_deref()) {
            (Some(id), Some(token)) if !token.is_empty() => Some((id, token)),
            _ => None,
        }
    }
}

/// Background updater intervals
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    pub presence_interval_secs: u64,
    pub stats_interval_secs: u64,
    pub presence_text: String,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            presence_interval_secs: 600,
            stats_interval_secs: 60,
            presence_text: "arrakis".to_string(),
        }
    }
}

/// Largest shard count one process will open
pub const MAX_SHARD_COUNT: u32 = 4096;

/// Gateway configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Discord bot token
    pub discord_token: String,

    /// Total number of shards; 0 asks Discord for the recommended count
    pub shard_count: u32,

    pub profile: DeploymentProfile,

    /// Connection watcher port; 0 disables the announce.
    /// Overridable by the single positional CLI argument.
    pub watcher_port: u16,

    /// NATS server URL(s) - comma-separated for multiple servers
    pub nats_url: Option<String>,

    pub nats_client_name: String,

    /// Health/metrics HTTP port
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Scheduled task pool workers
    pub task_pool_size: usize,

    pub handshake: HandshakeConfig,

    pub signal: SignalConfig,

    pub updaters: UpdaterConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            shard_count: 0,
            profile: DeploymentProfile::Full,
            watcher_port: 0,
            nats_url: None,
            nats_client_name: "arrakis-shards".to_string(),
            http_port: 9090,
            log_level: "info".to_string(),
            task_pool_size: crate::tasks::DEFAULT_WORKERS,
            handshake: HandshakeConfig::default(),
            signal: SignalConfig::default(),
            updaters: UpdaterConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from `.env`, the config file and the environment
    pub fn load() -> Result<Self, GatewayError> {
        dotenvy::dotenv().ok();

        let path = env::var("ARRAKIS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let builder = Config::builder()
            .add_source(File::with_name(&path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix("ARRAKIS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut config = Self::from_builder(builder)?;

        if config.discord_token.is_empty() {
            config.discord_token = env::var("DISCORD_TOKEN")
                .or_else(|_| env::var("DISCORD_BOT_TOKEN"))
                .unwrap_or_default();
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults. Does not validate.
    pub fn from_toml(source: &str) -> Result<Self, GatewayError> {
        Self::from_builder(Config::builder().add_source(File::from_str(source, FileFormat::Toml)))
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, GatewayError> {
        builder
            .build()
            .and_then(|c| c.try_deserialize::<GatewayConfig>())
            .map_err(|e| GatewayError::Config(e.to_string()))
    }

    /// Reject malformed values before any network I/O
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.discord_token.trim().is_empty() {
            return Err(GatewayError::Config(
                "discord_token (or DISCORD_TOKEN / DISCORD_BOT_TOKEN) must be set".to_string(),
            ));
        }

        if self.shard_count > MAX_SHARD_COUNT {
            return Err(GatewayError::Config(format!(
                "shard_count must be at most {MAX_SHARD_COUNT}, got {}",
                self.shard_count
            )));
        }

        if self.task_pool_size == 0 {
            return Err(GatewayError::Config("task_pool_size must be at least 1".to_string()));
        }

        if !self.profile.is_restricted() {
            match self.handshake.url.as_deref() {
                Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
                Some(url) => {
                    return Err(GatewayError::Config(format!(
                        "handshake.url must be an http(s) URL, got '{url}'"
                    )))
                }
                None => {
                    return Err(GatewayError::Config(format!(
                        "handshake.url is required for the '{}' profile",
                        self.profile.as_str()
                    )))
                }
            }
            if self.handshake.timeout_ms == 0 {
                return Err(GatewayError::Config("handshake.timeout_ms must be > 0".to_string()));
            }
        }

        if self.signal.webhook_id == Some(0) {
            return Err(GatewayError::Config("signal.webhook_id must be non-zero".to_string()));
        }

        if self.updaters.presence_interval_secs == 0 || self.updaters.stats_interval_secs == 0 {
            return Err(GatewayError::Config(
                "updater intervals must be at least one second".to_string(),
            ));
        }

        Ok(())
    }

    /// Get configured Discord intents
    ///
    /// - GUILDS: Required for guild lifecycle events
    /// - GUILD_MEMBERS: Required for member visibility (privileged)
    pub fn intents() -> Intents {
        Intents::GUILDS | Intents::GUILD_MEMBERS
    }
}
