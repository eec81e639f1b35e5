//! Central session state.

use crate::error::FailureReason;

/// State of a central session.
///
/// `Error` is terminal for the attempt; a new [`connect`] starts over.
///
/// [`connect`]: crate::central::CentralSession::connect
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// No scan, no link.
    #[default]
    Disconnected,
    /// Filtered scan running, scan timeout armed.
    Scanning,
    /// Connect request issued to the selected device.
    Connecting,
    /// Link up; discovery and reads in progress or done.
    Connected,
    /// The attempt failed.
    Error(FailureReason),
}

impl SessionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a connect attempt is in flight.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Scanning | Self::Connecting)
    }

    /// Whether `connect()` may start a new attempt from here.
    pub fn can_connect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error(_))
    }

    /// Failure reason, if in the error state.
    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Self::Error(reason) => Some(reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Error(reason) => write!(f, "Error({})", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state() {
        assert!(SessionState::Connected.is_connected());
        assert!(!SessionState::Connecting.is_connected());

        assert!(SessionState::Scanning.is_transitioning());
        assert!(SessionState::Connecting.is_transitioning());
        assert!(!SessionState::Connected.is_transitioning());

        assert!(SessionState::Disconnected.can_connect());
        assert!(SessionState::Error(FailureReason::ScanTimeout).can_connect());
        assert!(!SessionState::Scanning.can_connect());
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Connected.to_string(), "Connected");
        assert_eq!(
            SessionState::Error(FailureReason::ScanTimeout).to_string(),
            "Error(scan timeout)"
        );
    }

    #[test]
    fn test_failure_accessor() {
        assert_eq!(
            SessionState::Error(FailureReason::AdapterOff).failure(),
            Some(&FailureReason::AdapterOff)
        );
        assert_eq!(SessionState::Scanning.failure(), None);
    }
}
