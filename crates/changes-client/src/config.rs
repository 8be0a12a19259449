//! Feed configuration
//!
//! A [`StreamConfig`] is built once, validated, and read-only afterwards.
//! It can be assembled in code or loaded from TOML:
//!
//! ```toml
//! host = "couch.internal"
//! port = 6984
//! protocol = "https"
//! database = "orders"
//! heartbeat_ms = 5000
//! since = "1200-g1AAAAB"
//!
//! [credentials]
//! username = "reader"
//! password = "secret"
//!
//! [tuning]
//! reconnect_delay_ms = 2000
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::streaming::framer::DEFAULT_MAX_LINE_BYTES;
use crate::streaming::Cursor;

/// Feed heartbeat used when none (or a non-positive one) is configured
pub const DEFAULT_HEARTBEAT_MS: u64 = 2000;

/// Smallest accepted staleness multiplier
pub const MIN_STALENESS_MULTIPLIER: u32 = 5;

/// Connection settings for one feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Server host name or address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Plain or TLS transport
    #[serde(default)]
    pub protocol: Protocol,
    /// Database whose changes are followed (required)
    #[serde(default)]
    pub database: String,
    /// Keep-alive interval the server is asked to use, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_ms: Option<i64>,
    /// Ask for full document bodies with each change
    #[serde(default = "default_true")]
    pub include_docs: bool,
    /// Resume point; the feed starts after this sequence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<Cursor>,
    /// Basic auth credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    /// Server-side filter or view selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Which revisions are listed per change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<ChangesStyle>,
    /// Include conflicting revisions with documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<bool>,
    /// Start following as soon as the feed is spawned
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    /// Timers and limits
    #[serde(default)]
    pub tuning: Tuning,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5984
}

fn default_true() -> bool {
    true
}

/// Transport security
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Self::Https)
    }
}

/// Revision listing style of a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangesStyle {
    /// Only the winning revision
    MainOnly,
    /// All leaf revisions, conflicts included
    AllDocs,
}

impl ChangesStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MainOnly => "main_only",
            Self::AllDocs => "all_docs",
        }
    }
}

/// Basic auth credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Timers and limits of the connection task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Fixed delay between a termination and the next attempt
    pub reconnect_delay_ms: u64,
    /// Period of the staleness check
    pub watchdog_period_ms: u64,
    /// Silence longer than this many heartbeats tears the connection down
    pub staleness_multiplier: u32,
    /// TCP/TLS connect timeout for the HTTP transport
    pub connect_timeout_ms: u64,
    /// Largest pending line accepted from the server
    pub max_line_bytes: usize,
    /// Events buffered per observer before it starts lagging
    pub event_capacity: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 1000,
            watchdog_period_ms: 1000,
            staleness_multiplier: MIN_STALENESS_MULTIPLIER,
            connect_timeout_ms: 10_000,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            event_capacity: 1024,
        }
    }
}

impl StreamConfig {
    /// Create a configuration for `database` with default settings
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            protocol: Protocol::default(),
            database: database.into(),
            heartbeat_ms: None,
            include_docs: true,
            since: None,
            credentials: None,
            filter: None,
            style: None,
            conflicts: None,
            auto_connect: true,
            tuning: Tuning::default(),
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Check the rules that make a configuration usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.trim().is_empty() {
            return Err(ConfigError::MissingDatabase);
        }

        let tuning = &self.tuning;
        if tuning.staleness_multiplier < MIN_STALENESS_MULTIPLIER {
            return Err(ConfigError::InvalidTuning(format!(
                "staleness_multiplier must be at least {}, got {}",
                MIN_STALENESS_MULTIPLIER, tuning.staleness_multiplier
            )));
        }
        if tuning.watchdog_period_ms == 0 {
            return Err(ConfigError::InvalidTuning(
                "watchdog_period_ms must be positive".to_string(),
            ));
        }
        if tuning.event_capacity == 0 {
            return Err(ConfigError::InvalidTuning(
                "event_capacity must be positive".to_string(),
            ));
        }
        if tuning.max_line_bytes == 0 {
            return Err(ConfigError::InvalidTuning(
                "max_line_bytes must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Effective feed heartbeat in milliseconds
    pub fn heartbeat_millis(&self) -> u64 {
        match self.heartbeat_ms {
            Some(ms) if ms > 0 => ms as u64,
            _ => DEFAULT_HEARTBEAT_MS,
        }
    }

    /// Effective feed heartbeat
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_millis())
    }

    /// Silence after which a connection is considered dead
    pub fn staleness_threshold(&self) -> Duration {
        self.heartbeat() * self.tuning.staleness_multiplier
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.tuning.reconnect_delay_ms)
    }

    pub fn watchdog_period(&self) -> Duration {
        Duration::from_millis(self.tuning.watchdog_period_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.tuning.connect_timeout_ms)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_heartbeat_ms(mut self, heartbeat_ms: i64) -> Self {
        self.heartbeat_ms = Some(heartbeat_ms);
        self
    }

    pub fn with_include_docs(mut self, include_docs: bool) -> Self {
        self.include_docs = include_docs;
        self
    }

    pub fn with_since(mut self, since: impl Into<Cursor>) -> Self {
        self.since = Some(since.into());
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_style(mut self, style: ChangesStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn with_conflicts(mut self, conflicts: bool) -> Self {
        self.conflicts = Some(conflicts);
        self
    }

    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    pub fn with_tuning(mut self, tuning: Tuning) -> Self {
        self.tuning = tuning;
        self
    }
}
