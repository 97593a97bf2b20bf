/// Error taxonomy for the wake-word listener
///
/// `EngineError` is what an engine binding reports; `ErrorKind` is the
/// classified outcome the lifecycle controller stores in `Failed` and hands
/// to the status reporter.

use serde::Serialize;
use thiserror::Error;

/// Failures reported by a wake-word engine binding
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Activation error: {0}")]
    Activation(String),

    #[error("Activation limit reached: {0}")]
    ActivationLimit(String),

    #[error("Activation refused: {0}")]
    ActivationRefused(String),

    #[error("Activation throttled: {0}")]
    ActivationThrottled(String),

    #[error("Engine failure: {0}")]
    Failure(String),
}

/// Classified initialization failure
///
/// The `Display` output is the human-readable message shown to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message")]
pub enum ErrorKind {
    #[error("{0}")]
    InvalidConfiguration(String),

    #[error("AccessKey activation error")]
    ActivationError,

    #[error("AccessKey reached its device limit")]
    ActivationLimitReached,

    #[error("AccessKey refused")]
    ActivationRefused,

    #[error("AccessKey has been throttled")]
    ActivationThrottled,

    #[error("Failed to initialize wake word engine: {0}")]
    EngineFailure(String),
}

/// Whether a failed listener can be restarted as-is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RetryHint {
    /// Restarting with the same configuration will fail again
    Never,

    /// Something outside the process must change first (e.g. free a device slot)
    AfterRemediation,

    /// Retry once the rate limit window has passed
    AfterBackoff,

    Unknown,
}

impl ErrorKind {
    pub fn retry_hint(&self) -> RetryHint {
        match self {
            ErrorKind::InvalidConfiguration(_)
            | ErrorKind::ActivationError
            | ErrorKind::ActivationRefused => RetryHint::Never,
            ErrorKind::ActivationLimitReached => RetryHint::AfterRemediation,
            ErrorKind::ActivationThrottled => RetryHint::AfterBackoff,
            ErrorKind::EngineFailure(_) => RetryHint::Unknown,
        }
    }
}

impl From<EngineError> for ErrorKind {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidArgument(msg) => ErrorKind::InvalidConfiguration(msg),
            EngineError::Activation(_) => ErrorKind::ActivationError,
            EngineError::ActivationLimit(_) => ErrorKind::ActivationLimitReached,
            EngineError::ActivationRefused(_) => ErrorKind::ActivationRefused,
            EngineError::ActivationThrottled(_) => ErrorKind::ActivationThrottled,
            EngineError::Failure(msg) => ErrorKind::EngineFailure(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_errors_map_one_to_one() {
        let cases = [
            (
                EngineError::InvalidArgument("bad sensitivity".into()),
                ErrorKind::InvalidConfiguration("bad sensitivity".into()),
            ),
            (EngineError::Activation("x".into()), ErrorKind::ActivationError),
            (EngineError::ActivationLimit("x".into()), ErrorKind::ActivationLimitReached),
            (EngineError::ActivationRefused("x".into()), ErrorKind::ActivationRefused),
            (EngineError::ActivationThrottled("x".into()), ErrorKind::ActivationThrottled),
            (
                EngineError::Failure("device busy".into()),
                ErrorKind::EngineFailure("device busy".into()),
            ),
        ];

        for (engine_error, expected) in cases {
            assert_eq!(ErrorKind::from(engine_error), expected);
        }
    }

    #[test]
    fn test_user_facing_messages() {
        assert_eq!(
            ErrorKind::InvalidConfiguration("Access key is required".into()).to_string(),
            "Access key is required"
        );
        assert_eq!(
            ErrorKind::ActivationLimitReached.to_string(),
            "AccessKey reached its device limit"
        );
        assert_eq!(
            ErrorKind::EngineFailure("no audio device".into()).to_string(),
            "Failed to initialize wake word engine: no audio device"
        );
    }

    #[test]
    fn test_retry_hints() {
        assert_eq!(ErrorKind::ActivationThrottled.retry_hint(), RetryHint::AfterBackoff);
        assert_eq!(ErrorKind::ActivationLimitReached.retry_hint(), RetryHint::AfterRemediation);
        assert_eq!(ErrorKind::ActivationRefused.retry_hint(), RetryHint::Never);
        assert_eq!(ErrorKind::EngineFailure(String::new()).retry_hint(), RetryHint::Unknown);
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let json = serde_json::to_value(ErrorKind::InvalidConfiguration("empty key".into())).unwrap();
        assert_eq!(json["kind"], "InvalidConfiguration");
        assert_eq!(json["message"], "empty key");

        let json = serde_json::to_value(ErrorKind::ActivationRefused).unwrap();
        assert_eq!(json["kind"], "ActivationRefused");
    }
}
