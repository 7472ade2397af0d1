//! Broker error types

use std::fmt;

use ocrloop_ipc::{Fault, FaultKind, IpcError, ServiceId};
use thiserror::Error;

/// Broker result type
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Broker errors
#[derive(Error, Debug)]
pub enum BrokerError {
    /// A counterpart-issued id could not be resolved to a live service
    #[error("failed to dial {name} (service {id}): {source}")]
    Dial {
        name: String,
        id: ServiceId,
        #[source]
        source: Box<BrokerError>,
    },

    /// The handle or broker was already closed
    #[error("{name} is closed")]
    Closed { name: String },

    /// No endpoint is registered under the id
    #[error("unknown service {id}")]
    UnknownService { id: ServiceId },

    /// The counterpart answered with a fault
    #[error("{0}")]
    Remote(Fault),

    /// One or more resources failed to close
    #[error("{0}")]
    CloseAll(CloseErrors),

    /// Transport or framing failure
    #[error("transport error: {0}")]
    Ipc(IpcError),
}

impl BrokerError {
    pub fn dial(name: impl Into<String>, id: ServiceId, source: BrokerError) -> Self {
        Self::Dial {
            name: name.into(),
            id,
            source: Box::new(source),
        }
    }

    pub fn closed(name: impl Into<String>) -> Self {
        Self::Closed { name: name.into() }
    }

    /// Whether the broker's stop signal caused this failure
    pub fn is_cancelled(&self) -> bool {
        match self {
            BrokerError::Ipc(IpcError::Cancelled) => true,
            BrokerError::Remote(fault) => fault.kind == FaultKind::Cancelled,
            BrokerError::Dial { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Wire form of this error, for replying to the counterpart
    pub fn to_fault(&self) -> Fault {
        match self {
            BrokerError::Remote(fault) => fault.clone(),
            BrokerError::Dial { name, id, .. } => Fault::new(FaultKind::Dial, self.to_string())
                .with_service(name.clone())
                .with_service_id(*id),
            BrokerError::UnknownService { id } => {
                Fault::new(FaultKind::UnknownService, self.to_string()).with_service_id(*id)
            }
            BrokerError::Ipc(e) => e.to_fault(),
            BrokerError::Closed { .. } | BrokerError::CloseAll(_) => Fault::remote(self.to_string()),
        }
    }
}

impl From<IpcError> for BrokerError {
    fn from(err: IpcError) -> Self {
        match err {
            IpcError::Remote(fault) => BrokerError::Remote(fault),
            other => BrokerError::Ipc(other),
        }
    }
}

/// Failures collected while closing a set of resources
#[derive(Debug, Default)]
pub struct CloseErrors {
    failures: Vec<(String, BrokerError)>,
}

impl CloseErrors {
    pub fn push(&mut self, resource: impl Into<String>, err: BrokerError) {
        self.failures.push((resource.into(), err));
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Names of the resources that failed, in close order
    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|(name, _)| name.as_str())
    }

    pub fn into_result(self) -> BrokerResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(BrokerError::CloseAll(self))
        }
    }
}

impl fmt::Display for CloseErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to close {} resource(s)", self.failures.len())?;
        for (name, err) in &self.failures {
            write!(f, "; {}: {}", name, err)?;
        }
        Ok(())
    }
}
