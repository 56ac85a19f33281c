use connectors::{crm::CrmError, store::StoreError};
use engine_core::error::StateError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Required environment variable '{0}' is not set")]
    MissingEnv(String),

    #[error("Environment variable '{0}' has invalid value '{1}'")]
    InvalidEnv(String, String),

    #[error("Failed to build CRM client: {0}")]
    CrmClient(CrmError),

    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    #[error("State store error: {0}")]
    State(#[from] StateError),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(serde_json::Error),
}
