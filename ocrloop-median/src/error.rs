//! Median protocol error types

use ocrloop_broker::{BrokerError, Fault, FaultKind, ServiceId};
use ocrloop_codec::ValidationError;
use thiserror::Error;

/// Median protocol result type
pub type MedianResult<T> = Result<T, MedianError>;

/// Errors raised by median services and their clients
#[derive(Error, Debug)]
pub enum MedianError {
    /// Registration, dialing or transport failure, or a fault from the counterpart
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// A value violated a wire invariant before it was used
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The local implementation reported an error
    #[error("{0}")]
    Implementation(String),
}

impl MedianError {
    pub fn implementation(message: impl Into<String>) -> Self {
        Self::Implementation(message.into())
    }

    /// Whether the failure is a validation error, raised here or by the counterpart
    pub fn is_validation(&self) -> bool {
        match self {
            MedianError::Validation(_) => true,
            MedianError::Broker(BrokerError::Remote(fault)) => fault.kind == FaultKind::Validation,
            _ => false,
        }
    }

    /// Name of the dependency whose dial failed, locally or in the counterpart
    pub fn failed_dependency(&self) -> Option<&str> {
        match self {
            MedianError::Broker(BrokerError::Dial { name, .. }) => Some(name.as_str()),
            MedianError::Broker(BrokerError::Remote(fault)) if fault.kind == FaultKind::Dial => {
                fault.service.as_deref()
            }
            _ => None,
        }
    }

    /// Id of the dependency whose dial failed
    pub fn failed_dependency_id(&self) -> Option<ServiceId> {
        match self {
            MedianError::Broker(BrokerError::Dial { id, .. }) => Some(*id),
            MedianError::Broker(BrokerError::Remote(fault)) if fault.kind == FaultKind::Dial => fault.service_id,
            _ => None,
        }
    }

    pub fn to_fault(&self) -> Fault {
        match self {
            MedianError::Broker(e) => e.to_fault(),
            MedianError::Validation(e) => Fault::new(FaultKind::Validation, e.to_string()),
            MedianError::Implementation(message) => Fault::remote(message.clone()),
        }
    }
}

impl From<MedianError> for Fault {
    fn from(err: MedianError) -> Self {
        err.to_fault()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_fault_round_trip() {
        let err = MedianError::from(ValidationError::out_of_range("observer", 255, 256));
        let fault = err.to_fault();
        assert_eq!(fault.kind, FaultKind::Validation);

        let remote = MedianError::Broker(BrokerError::Remote(fault));
        assert!(remote.is_validation());
    }

    #[test]
    fn test_failed_dependency_from_remote_dial_fault() {
        let local = MedianError::Broker(BrokerError::dial(
            "MedianProvider",
            3,
            BrokerError::UnknownService { id: 3 },
        ));
        assert_eq!(local.failed_dependency(), Some("MedianProvider"));

        let remote = MedianError::Broker(BrokerError::Remote(local.to_fault()));
        assert_eq!(remote.failed_dependency(), Some("MedianProvider"));
        assert_eq!(MedianError::implementation("x").failed_dependency(), None);
    }
}
