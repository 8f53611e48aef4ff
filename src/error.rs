//! Error types for the bridge
//!
//! Provides structured error handling with numeric error codes for machine
//! parsing and exit codes for the CLI. Peer-discovery failure is
//! deliberately *not* an error: "peer not yet running" is an expected
//! steady state and surfaces as an absent client handle instead.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO / registry errors (2xx)
    IoError = 200,
    AddressNotFound = 210,
    AddressMalformed = 211,

    // Connection errors (3xx)
    ConnectionFailed = 300,
    ConnectionTimeout = 301,
    TransportError = 302,

    // Protocol errors (4xx)
    ProtocolMalformed = 401,
    ProtocolUnexpected = 402,

    // Task errors (5xx)
    RemoteTaskFailed = 500,

    // Internal errors (9xx)
    UnknownRole = 900,
    InternalError = 901,
}

impl ErrorCode {
    /// Get the string code (e.g., "E300")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10,
            200..=299 => 20,
            300..=399 => 30,
            400..=499 => 40,
            500..=599 => 50,
            _ => 90,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration parse error
    #[error("Failed to parse configuration {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A node was constructed with an unrecognized logical end
    #[error("Unrecognized role '{role}'. Expected one of: {expected}")]
    UnknownRole { role: String, expected: String },

    /// No address file exists for the requested end
    #[error("No address file for end '{end}' at {path}")]
    AddressNotFound { end: String, path: PathBuf },

    /// The address file content does not look like `tcp://ip:port`
    #[error("Malformed address '{text}' for end '{end}'")]
    AddressMalformed { end: String, text: String },

    /// TCP connect / initial ping failure
    #[error("Failed to connect to {addr}: {message}")]
    Connection { addr: String, message: String },

    /// Connection dropped or framing failed mid-call
    #[error("Transport error: {0}")]
    Transport(String),

    /// The peer sent something the protocol does not allow here
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON encode/decode failure at the transport boundary
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A remotely executed command failed; carries the peer-side trace
    #[error("Remote command failed:\n{trace}")]
    RemoteTask { trace: String },

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the numeric error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation(_) => ErrorCode::ConfigValidation,
            Error::Io(_) => ErrorCode::IoError,
            Error::UnknownRole { .. } => ErrorCode::UnknownRole,
            Error::AddressNotFound { .. } => ErrorCode::AddressNotFound,
            Error::AddressMalformed { .. } => ErrorCode::AddressMalformed,
            Error::Connection { .. } => ErrorCode::ConnectionFailed,
            Error::Transport(_) => ErrorCode::TransportError,
            Error::Protocol(_) => ErrorCode::ProtocolUnexpected,
            Error::Json(_) => ErrorCode::ProtocolMalformed,
            Error::RemoteTask { .. } => ErrorCode::RemoteTaskFailed,
            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Get the CLI exit code for this error
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    /// Whether this error indicates the peer was simply unreachable
    /// (recoverable by a later `try_setup_client`)
    pub fn is_discovery_failure(&self) -> bool {
        matches!(
            self,
            Error::AddressNotFound { .. }
                | Error::AddressMalformed { .. }
                | Error::Connection { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_strings() {
        assert_eq!(ErrorCode::ConnectionFailed.as_str(), "E300");
        assert_eq!(ErrorCode::RemoteTaskFailed.as_str(), "E500");
    }

    #[test]
    fn test_exit_code_groups() {
        assert_eq!(ErrorCode::ConfigValidation.exit_code(), 10);
        assert_eq!(ErrorCode::ConnectionTimeout.exit_code(), 30);
        assert_eq!(ErrorCode::UnknownRole.exit_code(), 90);
    }

    #[test]
    fn test_discovery_failures_are_recoverable() {
        let err = Error::Connection {
            addr: "127.0.0.1:1".to_string(),
            message: "refused".to_string(),
        };
        assert!(err.is_discovery_failure());

        let err = Error::RemoteTask {
            trace: "boom".to_string(),
        };
        assert!(!err.is_discovery_failure());
    }

    #[test]
    fn test_remote_task_carries_trace() {
        let err = Error::RemoteTask {
            trace: "division by zero".to_string(),
        };
        assert!(err.to_string().contains("division by zero"));
    }
}
