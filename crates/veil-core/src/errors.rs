use std::time::Duration;

/// Error taxonomy shared by the relay components.
///
/// Caller-input errors (`InvalidKind`, `MalformedEvent`) are rejected before
/// any state changes. The rest arise inside a running pipeline and only ever
/// surface as `log_entry` events plus a frozen message record.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RelayError {
    #[error("invalid kind: {0}")]
    InvalidKind(String),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("message {0} not found")]
    NotFound(u64),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("evaluation timed out after {0:?}")]
    EvaluationTimeout(Duration),

    #[error("store error: {0}")]
    Store(String),

    #[error("engine error: {0}")]
    Engine(String),
}

impl RelayError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidKind(_) => "invalid_kind",
            Self::MalformedEvent(_) => "malformed_event",
            Self::NotFound(_) => "not_found",
            Self::MalformedPayload(_) => "malformed_payload",
            Self::EvaluationTimeout(_) => "evaluation_timeout",
            Self::Store(_) => "store",
            Self::Engine(_) => "engine",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(RelayError::InvalidKind("A9".into()).to_string(), "invalid kind: A9");
        assert_eq!(RelayError::NotFound(7).to_string(), "message 7 not found");
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(RelayError::InvalidKind(String::new()).error_kind(), "invalid_kind");
        assert_eq!(
            RelayError::EvaluationTimeout(Duration::ZERO).error_kind(),
            "evaluation_timeout"
        );
        assert_eq!(RelayError::Store(String::new()).error_kind(), "store");
    }
}
