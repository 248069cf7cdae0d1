//! Error types for the connector
//!
//! One structured enum covers the four failure families the bridge
//! distinguishes: setup, transient protocol, decode invariants, and
//! publishing. Only receive timeouts and idempotent-setup SQLSTATEs are
//! recovered locally; everything else unwinds to session exit.

use thiserror::Error;

/// Main error type for the connector.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// Database connection related errors
    #[error("connection error: {message}")]
    Connection { message: String },

    /// Configuration related errors
    #[error("config: {message}")]
    Configuration { message: String },

    /// Slot, publication, or replication-start setup failures
    #[error("setup error: {message}")]
    Setup { message: String },

    /// Wire frame or logical message parsing errors
    #[error("message parsing error: {message}")]
    MessageParsing { message: String },

    /// Replication protocol errors
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Decode invariant violations (stream is desynchronised)
    #[error("decode error: {message}")]
    Decode { message: String },

    /// Broker rejected a record after its own retries
    #[error("publish error: {message}")]
    Publish { message: String },

    /// Network/IO related errors
    #[error("network IO error")]
    NetworkIO(#[from] std::io::Error),

    /// C string conversion errors
    #[error("C string conversion error")]
    CStringConversion(#[from] std::ffi::NulError),

    /// Task execution errors for async operations
    #[error("task execution error")]
    TaskExecution(#[from] tokio::task::JoinError),

    /// Configuration file parsing errors
    #[error("config parse error")]
    ConfigParse(#[from] serde_yaml::Error),
}

/// Result type alias for convenience
pub type ConnectorResult<T> = std::result::Result<T, ConnectorError>;

impl ConnectorError {
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn setup<S: Into<String>>(message: S) -> Self {
        Self::Setup {
            message: message.into(),
        }
    }

    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::MessageParsing {
            message: message.into(),
        }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn decode<S: Into<String>>(message: S) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn publish<S: Into<String>>(message: S) -> Self {
        Self::Publish {
            message: message.into(),
        }
    }
}
