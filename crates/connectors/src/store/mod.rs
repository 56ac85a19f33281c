use async_trait::async_trait;

pub mod error;
pub mod fs;

pub use error::StoreError;

/// Capability contract for a remote object bucket.
///
/// The engine requires that `put` is durable before it returns (a checkpoint
/// written just before a process kill must survive) and that `list` returns
/// every key under a prefix. Writes are last-writer-wins; there is no
/// compare-and-swap.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Keys under `prefix`, in lexicographic order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// `None` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
