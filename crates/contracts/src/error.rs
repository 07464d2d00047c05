//! Layered error definitions
//!
//! Categorized by source: config / decode / clock / bus / transfer / kv

use thiserror::Error;

/// Configuration and general-purpose error
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Scan frame decode failure
///
/// Local and non-retryable: the caller drops the frame and logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Timestamp field absent or empty
    #[error("scan frame has no timestamp")]
    MissingTimestamp,

    /// Values vector absent or zero length
    #[error("scan frame has no values")]
    EmptyValues,

    /// Byte layout cannot be parsed
    #[error("malformed scan frame: {reason}")]
    Malformed { reason: String },
}

impl DecodeError {
    /// Create a malformed-layout error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Short label used as a metrics dimension
    pub fn label(&self) -> &'static str {
        match self {
            Self::MissingTimestamp => "missing_timestamp",
            Self::EmptyValues => "empty_values",
            Self::Malformed { .. } => "malformed",
        }
    }
}

/// Sample clock reconstruction error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    /// Caller misuse (bad rate, empty batch, unusable first timestamp)
    #[error("invalid reconstruction input: {reason}")]
    InvalidInput { reason: String },
}

impl ClockError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }
}

/// Messaging bus error, raised by bus implementations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Request/reply wait elapsed
    #[error("request on '{subject}' timed out after {timeout_ms}ms")]
    Timeout { subject: String, timeout_ms: u64 },

    /// Nobody is listening on the request subject
    #[error("no responders on '{subject}'")]
    NoResponders { subject: String },

    /// Underlying transport failure
    #[error("transport error at {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// Connection already closed or drained
    #[error("connection to {endpoint} is closed")]
    Closed { endpoint: String },

    /// Registry closed the identity's connection
    #[error("identity '{identity}' is not connected")]
    NotConnected { identity: String },
}

/// Bulk transfer failure
///
/// Every export failure reaches the caller as one of these variants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Request rejected locally before anything was sent
    #[error("invalid export request: {message}")]
    InvalidRequest { message: String },

    /// Negotiation reply did not arrive in time
    #[error("negotiation with {endpoint} timed out after {timeout_ms}ms")]
    NegotiationTimeout { endpoint: String, timeout_ms: u64 },

    /// Negotiation failed at the transport layer
    #[error("negotiation with {endpoint} failed: {message}")]
    NegotiationTransport { endpoint: String, message: String },

    /// Responder declined the export
    #[error("export rejected: {reason}")]
    Rejected { reason: String },

    /// Responder failed mid-stream
    #[error("export failed remotely: {message}")]
    RemoteError { message: String },

    /// Data channel went away before a terminal frame
    #[error("channel '{channel}' closed before export completed")]
    ChannelClosed { channel: String },

    /// No frame arrived within the idle limit
    #[error("no export frame received for {idle_ms}ms")]
    StreamTimeout { idle_ms: u64 },

    /// Received byte count disagrees with the declared size
    #[error("export size mismatch: expected {expected} bytes, received {received}")]
    SizeMismatch { expected: u64, received: u64 },

    /// Frame violates the protocol
    #[error("malformed export frame: {message}")]
    MalformedFrame { message: String },

    /// Identity has no live connection
    #[error("identity '{identity}' is not connected")]
    NotConnected { identity: String },

    /// Operation issued in a state that does not allow it
    #[error("operation '{operation}' not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },
}

impl TransferError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }

    pub fn not_connected(identity: impl Into<String>) -> Self {
        Self::NotConnected {
            identity: identity.into(),
        }
    }

    /// Map a bus failure during negotiation or handshake
    pub fn from_negotiation(err: BusError, endpoint: &str) -> Self {
        match err {
            BusError::Timeout { timeout_ms, .. } => Self::NegotiationTimeout {
                endpoint: endpoint.to_string(),
                timeout_ms,
            },
            BusError::NotConnected { identity } => Self::NotConnected { identity },
            BusError::Closed { .. } => Self::NegotiationTransport {
                endpoint: endpoint.to_string(),
                message: "connection closed".to_string(),
            },
            other => Self::NegotiationTransport {
                endpoint: endpoint.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Whether a fresh attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NegotiationTimeout { .. }
                | Self::NegotiationTransport { .. }
                | Self::ChannelClosed { .. }
                | Self::StreamTimeout { .. }
        )
    }

    /// Short label used as a metrics dimension
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::NegotiationTimeout { .. } => "negotiation_timeout",
            Self::NegotiationTransport { .. } => "negotiation_transport",
            Self::Rejected { .. } => "rejected",
            Self::RemoteError { .. } => "remote_error",
            Self::ChannelClosed { .. } => "channel_closed",
            Self::StreamTimeout { .. } => "stream_timeout",
            Self::SizeMismatch { .. } => "size_mismatch",
            Self::MalformedFrame { .. } => "malformed_frame",
            Self::NotConnected { .. } => "not_connected",
            Self::InvalidState { .. } => "invalid_state",
        }
    }
}

/// Key/value collaborator error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KvError {
    /// Field name outside the allowed set
    #[error("unknown sensor field '{field}'")]
    UnknownField { field: String },

    /// Store has been closed
    #[error("key/value bucket '{bucket}' is closed")]
    Closed { bucket: String },
}
