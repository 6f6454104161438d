//! Session error taxonomy

use crate::transport::GattError;
use lbs_shared::Role;
use thiserror::Error;

/// How the session reacts to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Abort the process
    Fatal,
    /// Log and keep running
    Warning,
    /// Leave the run loop and shut down cleanly
    Terminal,
    /// Ignore
    Swallowed,
}

/// Everything that can go wrong over a session's lifetime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Could not connect to {address} (random: {random}; public: {public})")]
    ConnectionFailure {
        address: String,
        random: GattError,
        public: GattError,
    },

    #[error("Enabling {role} updates failed: {source}")]
    SubscriptionFailure { role: Role, source: GattError },

    #[error("Keep-alive read failed: {0}")]
    KeepAliveReadFailure(GattError),

    #[error("Device disconnected")]
    RuntimeDisconnection,

    #[error("Stopped by user")]
    UserCancellation,

    #[error("Session error: {0}")]
    Unclassified(GattError),

    #[error("Disconnect failed: {0}")]
    DisconnectFailure(GattError),
}

impl SessionError {
    /// Classify an error that ends the run loop
    pub fn terminal(err: GattError) -> Self {
        match err {
            GattError::Disconnected => SessionError::RuntimeDisconnection,
            other => SessionError::Unclassified(other),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            SessionError::ConnectionFailure { .. } => Severity::Fatal,
            SessionError::SubscriptionFailure { .. } | SessionError::KeepAliveReadFailure(_) => {
                Severity::Warning
            }
            SessionError::RuntimeDisconnection
            | SessionError::UserCancellation
            | SessionError::Unclassified(_) => Severity::Terminal,
            SessionError::DisconnectFailure(_) => Severity::Swallowed,
        }
    }

    /// Process exit code when this error ends the program
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            Severity::Fatal => 1,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classification() {
        assert_eq!(
            SessionError::terminal(GattError::Disconnected),
            SessionError::RuntimeDisconnection
        );
        assert_eq!(
            SessionError::terminal(GattError::Stack("boom".into())),
            SessionError::Unclassified(GattError::Stack("boom".into()))
        );
    }

    #[test]
    fn test_only_connection_failure_is_fatal() {
        let fatal = SessionError::ConnectionFailure {
            address: "c9:a3:d9:cb:02:b3".into(),
            random: GattError::Stack("timeout".into()),
            public: GattError::Stack("timeout".into()),
        };
        assert_eq!(fatal.severity(), Severity::Fatal);
        assert_eq!(fatal.exit_code(), 1);

        for err in [
            SessionError::RuntimeDisconnection,
            SessionError::UserCancellation,
            SessionError::Unclassified(GattError::Stack("x".into())),
            SessionError::KeepAliveReadFailure(GattError::Stack("x".into())),
            SessionError::DisconnectFailure(GattError::Disconnected),
        ] {
            assert_eq!(err.exit_code(), 0, "{err}");
        }
    }

    #[test]
    fn test_severities() {
        let warning = SessionError::SubscriptionFailure {
            role: Role::Sensor,
            source: GattError::NotPermitted(0x11),
        };
        assert_eq!(warning.severity(), Severity::Warning);
        assert_eq!(
            SessionError::DisconnectFailure(GattError::Disconnected).severity(),
            Severity::Swallowed
        );
        assert_eq!(SessionError::UserCancellation.severity(), Severity::Terminal);
    }
}
