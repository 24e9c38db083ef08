use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
