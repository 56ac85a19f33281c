use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrmError {
    #[error("CRM transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("CRM rejected the request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Record without a resolved contact id passed to create")]
    UnroutableRecord,
}
