//! IPC error types

use thiserror::Error;

use crate::protocol::{Fault, FaultKind};

/// IPC error types
#[derive(Debug, Clone, Error)]
pub enum IpcError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Protocol version mismatch
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolVersionMismatch { expected: u32, actual: u32 },

    /// The connection's stop signal fired
    #[error("Call cancelled: connection is stopping")]
    Cancelled,

    /// A frame exceeded the configured size limit
    #[error("Frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    /// The counterpart answered with a fault
    #[error("Remote fault: {0}")]
    Remote(Fault),

    /// Invalid message format
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
}

impl IpcError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, IpcError::IoError(_) | IpcError::ConnectionClosed)
    }

    /// Check if this error indicates a fatal condition for the connection
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IpcError::ProtocolVersionMismatch { .. }
                | IpcError::IoError(_)
                | IpcError::InvalidMessage(_)
                | IpcError::FrameTooLarge { .. }
        )
    }

    /// Fault to send back to the counterpart when this error ends a call
    pub fn to_fault(&self) -> Fault {
        match self {
            IpcError::Remote(fault) => fault.clone(),
            IpcError::Cancelled => Fault::new(FaultKind::Cancelled, self.to_string()),
            IpcError::DeserializationError(_) => Fault::new(FaultKind::Decode, self.to_string()),
            other => Fault::remote(other.to_string()),
        }
    }
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        IpcError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            IpcError::IoError(err.to_string())
        } else if err.is_data() || err.is_syntax() || err.is_eof() {
            IpcError::DeserializationError(err.to_string())
        } else {
            IpcError::SerializationError(err.to_string())
        }
    }
}

impl From<Fault> for IpcError {
    fn from(fault: Fault) -> Self {
        IpcError::Remote(fault)
    }
}
