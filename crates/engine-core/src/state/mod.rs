pub mod models;
pub mod store;

pub use models::{CheckpointStatus, InvocationLease, ProcessedHistory, ProgressCheckpoint};
pub use store::StateStore;
