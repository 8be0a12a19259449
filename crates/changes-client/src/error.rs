//! Error types for change-feed operations

use thiserror::Error;

/// Result type alias for change-feed operations
pub type Result<T> = std::result::Result<T, ChangesError>;

/// Errors returned by the public API of the client
///
/// Runtime failures of an active feed never surface here; they are reported
/// as [`FeedError`]s on the event surface instead.
#[derive(Error, Debug)]
pub enum ChangesError {
    /// Configuration rejected before any connection attempt
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The feed task is already running
    #[error("Feed already started")]
    AlreadyStarted,
}

/// Configuration errors, fatal at construction time
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The target database was absent or empty
    #[error("database parameter missing from config")]
    MissingDatabase,

    /// A tuning knob is out of range
    #[error("invalid tuning: {0}")]
    InvalidTuning(String),

    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed
    #[error("Failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Errors delivered on the `error` signal of a running feed
///
/// Cloneable so one failure can be fanned out to every observer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Connection failed, or the stream broke mid-flight
    #[error("Transport error: {0}")]
    Transport(String),

    /// Server answered the feed request with a non-success status
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Server reported inside the stream that the feed cannot be served
    #[error("Feed error {error}: {reason}")]
    Feed { error: String, reason: String },

    /// A single line was not valid JSON; it was dropped
    #[error("Parse error: {message} (line: {line})")]
    Parse { message: String, line: String },

    /// Pending fragment exceeded the line limit without a newline
    #[error("Line exceeded {limit} bytes without a delimiter (len={len})")]
    LineTooLong { len: usize, limit: usize },
}

impl FeedError {
    /// Create a server error from status code and message
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Whether the error came from the transport rather than the data
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Server { .. })
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
