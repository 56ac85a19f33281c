pub mod error;
pub mod source;

pub use error::CsvError;
pub use source::{CsvDealSource, CsvParseSummary};
