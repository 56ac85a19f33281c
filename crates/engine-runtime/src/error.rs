use connectors::{file::csv::CsvError, store::StoreError};
use engine_core::error::StateError;
use engine_processing::error::UploadError;
use thiserror::Error;

/// Hard faults inside one file's processing. These skip the file; they do
/// not abort the invocation.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("Source object disappeared between discovery and fetch")]
    SourceGone,

    #[error("Source store operation failed: {0}")]
    Fetch(#[from] StoreError),

    #[error("Failed to parse CSV: {0}")]
    Parse(#[from] CsvError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("State store failure: {0}")]
    State(#[from] StateError),
}
