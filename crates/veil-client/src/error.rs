#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("serialize failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("connection closed")]
    Closed,
}
