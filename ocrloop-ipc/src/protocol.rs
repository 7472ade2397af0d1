//! IPC protocol definitions and message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// IPC protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// Identifier of a logical service multiplexed over one connection
pub type ServiceId = u32;

/// Correlates a reply with the call that caused it
pub type CallId = u64;

/// Frames exchanged over the base connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Invoke `method` (`"<Interface>/<Method>"`) on the counterpart's service
    Call {
        call_id: CallId,
        service: ServiceId,
        method: String,
        payload: JsonValue,
    },

    /// Successful reply to a call
    Reply { call_id: CallId, payload: JsonValue },

    /// Failed reply to a call
    Fault { call_id: CallId, fault: Fault },
}

impl Frame {
    /// Call id this frame belongs to
    pub fn call_id(&self) -> CallId {
        match self {
            Frame::Call { call_id, .. } | Frame::Reply { call_id, .. } | Frame::Fault { call_id, .. } => {
                *call_id
            }
        }
    }
}

/// Category of a failure reported by the counterpart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The service implementation itself returned an error
    Remote,
    /// A value violated a wire invariant
    Validation,
    /// A dependency id could not be dialed
    Dial,
    /// No service is registered under the addressed id
    UnknownService,
    /// The service does not implement the method
    UnknownMethod,
    /// The request payload could not be decoded
    Decode,
    /// The counterpart was shutting down
    Cancelled,
}

/// Serializable error carried by [`Frame::Fault`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
    /// Logical name of the sub-service that produced the fault
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Service id the fault concerns, for dial and lookup failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<ServiceId>,
}

impl Fault {
    /// Create a new fault
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            service: None,
            service_id: None,
        }
    }

    /// Fault produced by a service implementation
    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Remote, message)
    }

    /// Attach the producing service name unless one is already recorded
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        if self.service.is_none() {
            self.service = Some(service.into());
        }
        self
    }

    pub fn with_service_id(mut self, id: ServiceId) -> Self {
        self.service_id = Some(id);
        self
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.service {
            Some(service) => write!(f, "{}: {}", service, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for Fault {}

/// Message envelope for all IPC communications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }
}
