//! Failure taxonomy of a provisioning run.
//!
//! Per-device failures never abort the whole run by themselves; they are
//! collected as [`OperationError`] values and the orchestrator decides which
//! phases still run.

use crate::device::DeviceError;
use std::fmt;

/// Why a device action failed
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActionError {
    /// No session could be opened; nothing further runs on that device
    #[error("{0}")]
    Login(DeviceError),
    /// A device-unique object already exists under another name
    #[error("{kind} {existing} already configured on switch")]
    Conflict { kind: &'static str, existing: String },
    #[error(transparent)]
    Step(#[from] DeviceError),
    #[error("Unsupported Operation")]
    UnsupportedClusterOperation { bitmap: u64 },
    #[error("{0}")]
    Precondition(String),
    #[error("Management Cluster is not operational. Polling timed out")]
    PollTimeout,
}

/// A failed operation against one host
#[derive(Debug, Clone, thiserror::Error)]
#[error("{{Host={host},Operation={operation},Error={error}}}")]
pub struct OperationError {
    pub operation: String,
    pub host: String,
    #[source]
    pub error: ActionError,
}

impl OperationError {
    pub fn new(operation: impl Into<String>, host: impl Into<String>, error: impl Into<ActionError>) -> Self {
        Self {
            operation: operation.into(),
            host: host.into(),
            error: error.into(),
        }
    }

    pub fn is_login(&self) -> bool {
        matches!(self.error, ActionError::Login(_))
    }
}

/// Render a batch of errors, one per line
pub struct OperationErrors<'a>(pub &'a [OperationError]);

impl fmt::Display for OperationErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, error) in self.0.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_rendering() {
        let err = OperationError::new(
            "Configure Overlay Gateway",
            "10.24.0.3",
            ActionError::Conflict { kind: "Overlay gateway", existing: "OVG_FAIL".to_string() },
        );
        assert_eq!(
            err.to_string(),
            "{Host=10.24.0.3,Operation=Configure Overlay Gateway,Error=Overlay gateway OVG_FAIL already configured on switch}"
        );
    }

    #[test]
    fn test_device_error_converts_to_step() {
        let device = DeviceError::Rejected { operation: "Configure Router ID", reason: "bad".to_string() };
        let err = OperationError::new("Router ID", "10.24.0.1", device);
        assert!(matches!(err.error, ActionError::Step(_)));
        assert!(!err.is_login());
    }

    #[test]
    fn test_multiline_rendering() {
        let errors = vec![
            OperationError::new("Persist Config", "a", ActionError::Precondition("x".to_string())),
            OperationError::new("Persist Config", "b", ActionError::Precondition("y".to_string())),
        ];
        assert_eq!(
            OperationErrors(&errors).to_string(),
            "{Host=a,Operation=Persist Config,Error=x}\n{Host=b,Operation=Persist Config,Error=y}"
        );
    }
}
