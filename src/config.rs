use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// WebSocket endpoint of the brokerage gateway (ws:// or wss://)
    pub ws_url: String,
    /// Time allowed for the auth handshake after the socket opens
    #[serde(default = "default_auth_timeout_ms")]
    pub auth_timeout_ms: u64,
    /// Per-request timeout for request/response calls
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Quiet period before the feed is considered stale
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
}

fn default_auth_timeout_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    /// First retry delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Ceiling for the exponential backoff
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fractional jitter applied to each delay (0.2 = ±20%)
    #[serde(default = "default_jitter_pct")]
    pub jitter_pct: f64,
    /// Retry attempts before giving up and entering the error state
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_pct() -> f64 {
    0.2
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_pct: 0.2,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// How long a persisted session stays eligible for auto-resume
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: i64,
    /// Reconnect automatically on unexpected drops
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
    /// Override for the session record path; defaults to the platform
    /// data directory
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
}

fn default_ttl_minutes() -> i64 {
    30
}

fn default_auto_reconnect() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: 30,
            auto_reconnect: true,
            storage_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("BROKERSYNC_ENV")
                        .unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (BROKERSYNC_GATEWAY__WS_URL, etc.)
            .add_source(
                Environment::with_prefix("BROKERSYNC")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Create a default configuration pointed at the given gateway
    pub fn default_config(ws_url: &str) -> Self {
        Self {
            gateway: GatewayConfig {
                ws_url: ws_url.to_string(),
                auth_timeout_ms: 5_000,
                request_timeout_ms: 10_000,
                heartbeat_timeout_ms: 10_000,
            },
            reconnect: ReconnectConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.gateway.ws_url.is_empty() {
            errors.push("gateway.ws_url must be set".to_string());
        } else if !self.gateway.ws_url.starts_with("ws://")
            && !self.gateway.ws_url.starts_with("wss://")
        {
            errors.push(format!(
                "gateway.ws_url must use ws:// or wss://, got {}",
                self.gateway.ws_url
            ));
        }

        if self.gateway.request_timeout_ms == 0 {
            errors.push("gateway.request_timeout_ms must be positive".to_string());
        }

        if self.reconnect.base_delay_ms == 0 {
            errors.push("reconnect.base_delay_ms must be positive".to_string());
        }

        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            errors.push(format!(
                "reconnect.max_delay_ms ({}) must be >= base_delay_ms ({})",
                self.reconnect.max_delay_ms, self.reconnect.base_delay_ms
            ));
        }

        if !(0.0..1.0).contains(&self.reconnect.jitter_pct) {
            errors.push("reconnect.jitter_pct must be in [0, 1)".to_string());
        }

        if self.reconnect.max_attempts == 0 {
            errors.push("reconnect.max_attempts must be at least 1".to_string());
        }

        if self.session.ttl_minutes <= 0 {
            errors.push("session.ttl_minutes must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
