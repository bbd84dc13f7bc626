//! Error types for the refresh worker
//!
//! Three layers:
//! - [`OperationError`]: outcome of one bounded external-application run
//! - [`TaskError`]: outcome of executing one queued task
//! - [`Error`]: everything else the binary can fail with, carrying
//!   numeric error codes, exit codes and terminal hints

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for worker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Remote store errors (3xx)
    RemoteRequest = 300,
    RemoteStatus = 301,
    AuthenticationFailed = 302,
    CredentialMissing = 303,

    // Queue errors (4xx)
    QueueStorage = 400,
    QueueElementNotFound = 401,
    PayloadEncoding = 402,

    // Execution errors (5xx)
    FetchTimeout = 500,
    FetchFailed = 501,
    ProcessingTimeout = 502,
    ProcessingFailed = 503,
    PublishFailed = 504,
    BusinessRule = 505,
    TooManyFailures = 510,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10,
            200..=299 => 20,
            300..=399 => 30,
            400..=499 => 40,
            500..=599 => 50,
            900..=999 => 90,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────
// External Operation Errors
// ─────────────────────────────────────────────────────────────────

/// Failure of a single bounded external-application run
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// The application did not finish before the deadline
    #[error("external application exceeded its timeout of {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The application could not be started or reported a failure
    #[error("external application failed: {0}")]
    Failed(String),
}

// ─────────────────────────────────────────────────────────────────
// Task Errors
// ─────────────────────────────────────────────────────────────────

/// Failure of one queued task
///
/// Everything except [`TaskError::Business`] is an infrastructure failure:
/// the executor has already run its cleanup sequence and the controller
/// answers it with a reset and another attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task itself is invalid; never retried at run level
    #[error("Business error: {0}")]
    Business(String),

    #[error("Authentication against {site} failed: {message}")]
    AuthenticationFailed { site: String, message: String },

    /// Download did not materialize locally within the wait bound
    #[error("File not found at {} after waiting for {wait_secs} seconds", .path.display())]
    FetchTimeout { path: PathBuf, wait_secs: u64 },

    #[error("Failed to fetch {remote_path}: {message}")]
    FetchFailed { remote_path: String, message: String },

    #[error("Refresh did not complete within the allowed time of {timeout_secs} seconds")]
    ProcessingTimeout { timeout_secs: u64 },

    #[error("Error in refresh: {0}")]
    ProcessingFailed(String),

    #[error("Failed to publish to {remote_folder}: {message}")]
    PublishFailed { remote_folder: String, message: String },
}

impl TaskError {
    /// Whether this is a business-rule failure rather than an infrastructure fault
    pub fn is_business(&self) -> bool {
        matches!(self, TaskError::Business(_))
    }

    pub fn business(message: impl Into<String>) -> Self {
        TaskError::Business(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            TaskError::Business(_) => ErrorCode::BusinessRule,
            TaskError::AuthenticationFailed { .. } => ErrorCode::AuthenticationFailed,
            TaskError::FetchTimeout { .. } => ErrorCode::FetchTimeout,
            TaskError::FetchFailed { .. } => ErrorCode::FetchFailed,
            TaskError::ProcessingTimeout { .. } => ErrorCode::ProcessingTimeout,
            TaskError::ProcessingFailed(_) => ErrorCode::ProcessingFailed,
            TaskError::PublishFailed { .. } => ErrorCode::PublishFailed,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Application Errors
// ─────────────────────────────────────────────────────────────────

/// Main error type for the worker
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file not found
    #[error("Configuration file not found: {}", .path.display())]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error(
        "Configuration validation failed{}: {message}",
        .field.as_deref().map(|f| format!(" for {}", f)).unwrap_or_default()
    )]
    ConfigValidation { message: String, field: Option<String> },

    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// File read error
    #[error("Failed to read file: {}", .path.display())]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {}", .path.display())]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A remote store request could not be completed
    #[error("Remote request to {url} failed: {message}")]
    RemoteRequest { url: String, message: String },

    /// A remote store answered with an error status
    #[error("Remote store returned {status} for {url}: {message}")]
    RemoteStatus { url: String, status: u16, message: String },

    #[error("Authentication against {site} failed: {message}")]
    AuthenticationFailed { site: String, message: String },

    #[error("Credential '{name}' is not available")]
    CredentialMissing { name: String },

    /// Queue storage failure
    #[error("Queue storage error: {0}")]
    Queue(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Queue element not found: {id}")]
    QueueElementNotFound { id: String },

    #[error(transparent)]
    Task(#[from] TaskError),

    /// Every retry attempt of a run ended in an infrastructure failure
    #[error("Process failed too many times ({attempts} attempts): {last_error}")]
    TooManyFailures { attempts: u32, last_error: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,
            Error::Config(_) => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,
            Error::Json(_) => ErrorCode::PayloadEncoding,

            Error::RemoteRequest { .. } => ErrorCode::RemoteRequest,
            Error::RemoteStatus { .. } => ErrorCode::RemoteStatus,
            Error::AuthenticationFailed { .. } => ErrorCode::AuthenticationFailed,
            Error::CredentialMissing { .. } => ErrorCode::CredentialMissing,

            Error::Queue(_) => ErrorCode::QueueStorage,
            Error::Sqlite(_) => ErrorCode::QueueStorage,
            Error::QueueElementNotFound { .. } => ErrorCode::QueueElementNotFound,

            Error::Task(e) => e.code(),
            Error::TooManyFailures { .. } => ErrorCode::TooManyFailures,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'refresh-worker config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'refresh-worker config validate' to see details."
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values."
            ),
            Error::CredentialMissing { .. } => Some(
                "Set REFRESH_WORKER_CREDENTIAL_<NAME>_USERNAME and _PASSWORD for the named credential."
            ),
            Error::AuthenticationFailed { .. } => Some(
                "Verify the site URL, the tenant and client id, and the certificate thumbprint and key."
            ),
            Error::Sqlite(_) | Error::Queue(_) => Some(
                "Check that [queue] database points to a writable SQLite file."
            ),
            Error::TooManyFailures { .. } => Some(
                "Inspect the log for the failing task, then re-run. The queue elements were marked failed."
            ),
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!("\x1b[31mError [{}]\x1b[0m: {}\n", self.code().as_str(), self);

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Error::ConfigNotFound { path: path.into() }
    }

    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: None,
        }
    }

    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn remote_request(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::RemoteRequest {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn queue(message: impl Into<String>) -> Self {
        Error::Queue(message.into())
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
