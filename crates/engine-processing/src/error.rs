use engine_core::error::StateError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to persist checkpoint for '{source_key}': {source}")]
    Checkpoint {
        source_key: String,
        #[source]
        source: StateError,
    },
}
