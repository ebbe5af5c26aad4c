//! Error taxonomy shared by the dispatcher, registry and orchestrator.

use std::fmt;

use thiserror::Error;

use crate::dispatcher::DispatchError;
use crate::partition::RegistryError;

/// Discriminant of [`OdinError`], small enough to live inside session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport tool missing or misconfigured.
    TransportNotFound,
    /// Operation refused before dispatch: no suitable device.
    DeviceNotConnected,
    /// Command exceeded its timeout.
    CommandTimeout,
    /// Command exited non-zero or reported a known error.
    CommandFailed,
    /// Device vanished while the command ran.
    TransportDisconnected,
    /// Bad partition file selection.
    ValidationError,
    /// Another flash session is active.
    SessionBusy,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::TransportNotFound => write!(f, "Transport Not Found"),
            ErrorKind::DeviceNotConnected => write!(f, "Device Not Connected"),
            ErrorKind::CommandTimeout => write!(f, "Command Timeout"),
            ErrorKind::CommandFailed => write!(f, "Command Failed"),
            ErrorKind::TransportDisconnected => write!(f, "Transport Disconnected"),
            ErrorKind::ValidationError => write!(f, "Validation Error"),
            ErrorKind::SessionBusy => write!(f, "Session Busy"),
        }
    }
}

/// Errors surfaced to the collaborator layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OdinError {
    #[error("Transport tool not found: {0}")]
    TransportNotFound(String),

    #[error("Device not connected: {0}")]
    DeviceNotConnected(String),

    #[error("Command timed out: {0}")]
    CommandTimeout(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Device disconnected: {0}")]
    TransportDisconnected(String),

    #[error("Invalid selection: {0}")]
    ValidationError(String),

    #[error("A flash session is already active")]
    SessionBusy,
}

impl OdinError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OdinError::TransportNotFound(_) => ErrorKind::TransportNotFound,
            OdinError::DeviceNotConnected(_) => ErrorKind::DeviceNotConnected,
            OdinError::CommandTimeout(_) => ErrorKind::CommandTimeout,
            OdinError::CommandFailed(_) => ErrorKind::CommandFailed,
            OdinError::TransportDisconnected(_) => ErrorKind::TransportDisconnected,
            OdinError::ValidationError(_) => ErrorKind::ValidationError,
            OdinError::SessionBusy => ErrorKind::SessionBusy,
        }
    }
}

impl From<DispatchError> for OdinError {
    fn from(err: DispatchError) -> Self {
        let message = err.to_string();
        match err.kind() {
            ErrorKind::TransportNotFound => OdinError::TransportNotFound(message),
            ErrorKind::CommandTimeout => OdinError::CommandTimeout(message),
            ErrorKind::TransportDisconnected => OdinError::TransportDisconnected(message),
            _ => OdinError::CommandFailed(message),
        }
    }
}

impl From<RegistryError> for OdinError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Locked => OdinError::SessionBusy,
            other => OdinError::ValidationError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_mapping() {
        let err: OdinError = DispatchError::Timeout {
            program: "odin4".into(),
            timeout_ms: 1000,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::CommandTimeout);

        let err: OdinError = DispatchError::NotFound {
            program: "adb".into(),
            message: "No such file or directory".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::TransportNotFound);
    }

    #[test]
    fn test_registry_lock_is_session_busy() {
        let err: OdinError = RegistryError::Locked.into();
        assert_eq!(err, OdinError::SessionBusy);
    }
}
