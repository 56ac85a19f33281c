use thiserror::Error;

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("Failed to read CSV data: {0}")]
    Read(#[from] csv::Error),

    #[error("CSV file has no '{0}' column")]
    MissingColumn(String),
}
