use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object store I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid object key '{0}'")]
    InvalidKey(String),

    #[error("Object store unavailable: {0}")]
    Unavailable(String),
}
