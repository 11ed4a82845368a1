use std::time::Duration;

use veil_core::RelayError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("seal failed: {0}")]
    SealFailed(String),

    #[error("evaluation timed out after {0:?}")]
    EvaluationTimeout(Duration),
}

impl From<EngineError> for RelayError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::MalformedPayload(msg) => RelayError::MalformedPayload(msg),
            EngineError::EvaluationTimeout(d) => RelayError::EvaluationTimeout(d),
            EngineError::SealFailed(msg) => RelayError::Engine(msg),
        }
    }
}
