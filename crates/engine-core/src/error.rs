use connectors::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("State store operation failed: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to serialize state document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checkpoint for '{key}' is corrupt: {message}")]
    CorruptCheckpoint { key: String, message: String },
}
