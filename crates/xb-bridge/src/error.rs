use xb_harness::platform::PlatformError;
use xb_harness::signing::SigningError;
use xb_harness::transport::TransportError;

/// Broad class of a per-command failure, used for log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The line could not be read as a command.
    Protocol,
    /// The command named an action but its arguments were unusable.
    Validation,
    /// A signed request could not be signed and was not sent.
    Signing,
    /// The platform or the network failed.
    Upstream,
    /// The handler itself crashed.
    Internal,
}

/// Everything that turns into `{"success": false, "error": ...}`.
///
/// The `Display` text is the wire `error` string, so the protocol-level
/// messages are fixed.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("invalid command")]
    InvalidCommand,

    #[error("missing action")]
    MissingAction,

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("missing required argument '{0}'")]
    MissingArgument(String),

    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("request signing failed: {0}")]
    Signing(String),

    #[error("{0}")]
    Upstream(String),

    #[error("handler panicked: {0}")]
    Panicked(String),

    /// The bridge stopped before the command finished.
    #[error("aborted at shutdown")]
    Aborted,
}

impl ActionError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ActionError::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ActionError::InvalidCommand | ActionError::MissingAction => ErrorKind::Protocol,
            ActionError::UnknownAction(_)
            | ActionError::MissingArgument(_)
            | ActionError::InvalidArgument { .. } => ErrorKind::Validation,
            ActionError::Signing(_) => ErrorKind::Signing,
            ActionError::Upstream(_) => ErrorKind::Upstream,
            ActionError::Panicked(_) | ActionError::Aborted => ErrorKind::Internal,
        }
    }
}

impl From<SigningError> for ActionError {
    fn from(err: SigningError) -> Self {
        ActionError::Signing(err.to_string())
    }
}

impl From<PlatformError> for ActionError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::Transport(TransportError::Signing(e)) => e.into(),
            other => ActionError::Upstream(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ActionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_messages_are_fixed() {
        assert_eq!(ActionError::InvalidCommand.to_string(), "invalid command");
        assert_eq!(ActionError::MissingAction.to_string(), "missing action");
        assert_eq!(
            ActionError::UnknownAction("bogus".into()).to_string(),
            "unknown action 'bogus'"
        );
    }

    #[test]
    fn signing_failure_inside_platform_error_is_signing() {
        let err: ActionError =
            PlatformError::Transport(TransportError::Signing(SigningError::EmptyToken)).into();
        assert_eq!(err.kind(), ErrorKind::Signing);
        assert!(err.to_string().starts_with("request signing failed"));
    }

    #[test]
    fn upstream_message_is_preserved() {
        let err: ActionError = PlatformError::Status {
            status: 429,
            message: "Rate limit exceeded".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert!(err.to_string().contains("Rate limit exceeded"));
    }
}
