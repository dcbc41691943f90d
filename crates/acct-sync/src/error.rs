//! Error types for the sync library.

use thiserror::Error;

/// Exit code for configuration problems (bad YAML, missing fields, etc.)
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code when the source database cannot be reached.
pub const EXIT_SOURCE_ERROR: u8 = 2;
/// Exit code for API transport failures outside a pipeline run.
pub const EXIT_TRANSPORT_ERROR: u8 = 3;
/// Exit code when a run completes but reports failure.
pub const EXIT_SYNC_FAILED: u8 = 4;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;
/// Exit code after SIGINT/SIGTERM.
pub const EXIT_CANCELLED: u8 = 130;

/// Main error type for sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database connection or query error
    #[error("Source database error: {0}")]
    Source(String),

    /// Fetching rows for one entity failed
    #[error("Fetch failed for {entity}: {message}")]
    Fetch { entity: String, message: String },

    /// Request could not be delivered to the API
    #[error("Transport failed for {entity}: {message}")]
    Transport { entity: String, message: String },

    /// API answered with a non-success status
    #[error("API rejected {entity} with status {status}: {message}")]
    Rejected {
        entity: String,
        status: u16,
        /// `error` field of a JSON body, otherwise the raw body.
        message: String,
        /// Raw response body.
        body: String,
    },

    /// API request exceeded its deadline
    #[error("API request for {entity} timed out after {secs}s")]
    Timeout { entity: String, secs: u64 },

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed API URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The run finished but did not succeed
    #[error("Sync failed: {0}")]
    SyncFailed(String),

    /// Sync was cancelled (SIGINT, etc.)
    #[error("Sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Create a Fetch error
    pub fn fetch(entity: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Fetch {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Create a Transport error
    pub fn transport(entity: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Transport {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::Config(_) | SyncError::Yaml(_) | SyncError::Json(_) | SyncError::Url(_) => {
                EXIT_CONFIG_ERROR
            }
            SyncError::Source(_) => EXIT_SOURCE_ERROR,
            SyncError::Fetch { .. }
            | SyncError::Transport { .. }
            | SyncError::Rejected { .. }
            | SyncError::Timeout { .. }
            | SyncError::Http(_) => EXIT_TRANSPORT_ERROR,
            SyncError::SyncFailed(_) => EXIT_SYNC_FAILED,
            SyncError::Io(_) => EXIT_IO_ERROR,
            SyncError::Cancelled => EXIT_CANCELLED,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        if let SyncError::Rejected { message, body, .. } = self {
            if body != message {
                output.push_str(&format!("\nResponse body:\n  {}\n", body));
            }
        }

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
