use veil_core::RelayError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("message {0} not found")]
    NotFound(u64),

    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<StoreError> for RelayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => RelayError::NotFound(id),
            StoreError::Conflict(msg) => RelayError::Store(msg),
        }
    }
}
