use crate::{
    error::StateError,
    retry::{RetryDisposition, RetryPolicy},
    state::models::{InvocationLease, ProcessedHistory, ProgressCheckpoint},
};
use connectors::store::{ObjectStore, StoreError};
use std::sync::Arc;
use tracing::warn;

const PROGRESS_PREFIX: &str = "state/progress/";
const HISTORY_KEY: &str = "state/processed.json";
const REPORT_PREFIX: &str = "state/reports/";
const LEASE_KEY: &str = "state/lease.json";

/// Checkpoint, history, lease and report persistence, layered over the
/// object-store collaborator as serde-JSON documents.
///
/// Writes go through the retry policy: a transient store fault must not
/// cost a checkpoint. Semantics are last-writer-wins; the only guard is
/// the monotonicity check in [`save_checkpoint`](StateStore::save_checkpoint).
pub struct StateStore {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
}

fn classify_store_error(err: &StoreError) -> RetryDisposition {
    match err {
        StoreError::Io(_) | StoreError::Unavailable(_) => RetryDisposition::Retry,
        StoreError::InvalidKey(_) => RetryDisposition::Stop,
    }
}

/// Source keys may contain path separators; flatten them so each
/// checkpoint is a single object under the progress prefix.
fn encode_key(source_key: &str) -> String {
    source_key.replace('/', "__")
}

impl StateStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        StateStore {
            store,
            retry: RetryPolicy::for_state_store(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Cheap connectivity check against the backing store.
    pub async fn probe(&self) -> Result<(), StateError> {
        self.store.list(PROGRESS_PREFIX).await?;
        Ok(())
    }

    async fn put_retried(&self, key: &str, bytes: Vec<u8>) -> Result<(), StateError> {
        self.retry
            .run(|| self.store.put(key, &bytes), classify_store_error)
            .await
            .map_err(|err| StateError::Store(err.into_inner()))
    }

    pub async fn load_history(&self) -> Result<ProcessedHistory, StateError> {
        match self.store.get(HISTORY_KEY).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(ProcessedHistory::default()),
        }
    }

    pub async fn save_history(&self, history: &ProcessedHistory) -> Result<(), StateError> {
        let bytes = serde_json::to_vec_pretty(history)?;
        self.put_retried(HISTORY_KEY, bytes).await
    }

    pub async fn load_checkpoint(
        &self,
        source_key: &str,
    ) -> Result<Option<ProgressCheckpoint>, StateError> {
        let key = format!("{PROGRESS_PREFIX}{}.json", encode_key(source_key));
        match self.store.get(&key).await? {
            Some(bytes) => {
                let cp = serde_json::from_slice(&bytes).map_err(|err| {
                    StateError::CorruptCheckpoint {
                        key: source_key.to_string(),
                        message: err.to_string(),
                    }
                })?;
                Ok(Some(cp))
            }
            None => Ok(None),
        }
    }

    /// Persists a checkpoint, enforcing monotonic progress: an update that
    /// would move `processed_records` backwards, or reopen a completed
    /// file, is skipped with a warning rather than written.
    pub async fn save_checkpoint(&self, cp: &ProgressCheckpoint) -> Result<(), StateError> {
        let existing = match self.load_checkpoint(&cp.source_key).await {
            Ok(existing) => existing,
            Err(StateError::CorruptCheckpoint { key, message }) => {
                // An unreadable document must not wedge the file forever.
                warn!(source_key = %key, message = %message, "Overwriting corrupt checkpoint");
                None
            }
            Err(err) => return Err(err),
        };

        if let Some(existing) = existing {
            let regresses = cp.processed_records < existing.processed_records;
            let reopens = existing.is_complete() && !cp.is_complete();
            if regresses || reopens {
                warn!(
                    source_key = %cp.source_key,
                    existing = existing.processed_records,
                    proposed = cp.processed_records,
                    "Skipping checkpoint write that would regress progress"
                );
                return Ok(());
            }
        }

        let key = format!("{PROGRESS_PREFIX}{}.json", encode_key(&cp.source_key));
        let bytes = serde_json::to_vec_pretty(cp)?;
        self.put_retried(&key, bytes).await
    }

    pub async fn delete_checkpoint(&self, source_key: &str) -> Result<(), StateError> {
        let key = format!("{PROGRESS_PREFIX}{}.json", encode_key(source_key));
        self.store.delete(&key).await?;
        Ok(())
    }

    /// Every checkpoint still in `Processing` state, for resumption.
    /// Unreadable checkpoint documents are skipped with a warning — one
    /// corrupt object must not wedge discovery forever.
    pub async fn list_partials(&self) -> Result<Vec<ProgressCheckpoint>, StateError> {
        let keys = self.store.list(PROGRESS_PREFIX).await?;
        let mut partials = Vec::new();

        for key in keys {
            let Some(bytes) = self.store.get(&key).await? else {
                continue;
            };
            match serde_json::from_slice::<ProgressCheckpoint>(&bytes) {
                Ok(cp) if !cp.is_complete() => partials.push(cp),
                Ok(_) => {}
                Err(err) => {
                    warn!(object = %key, error = %err, "Skipping unreadable checkpoint");
                }
            }
        }

        Ok(partials)
    }

    pub async fn save_report(&self, source_key: &str, report: &str) -> Result<(), StateError> {
        let key = format!("{REPORT_PREFIX}{}.txt", encode_key(source_key));
        self.put_retried(&key, report.as_bytes().to_vec()).await
    }

    pub async fn load_lease(&self) -> Result<Option<InvocationLease>, StateError> {
        match self.store.get(LEASE_KEY).await? {
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(lease) => Ok(Some(lease)),
                Err(err) => {
                    // A mangled lease must not lock the system out.
                    warn!(error = %err, "Discarding unreadable lease");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub async fn save_lease(&self, lease: &InvocationLease) -> Result<(), StateError> {
        let bytes = serde_json::to_vec(lease)?;
        self.put_retried(LEASE_KEY, bytes).await
    }

    pub async fn clear_lease(&self) -> Result<(), StateError> {
        self.store.delete(LEASE_KEY).await?;
        Ok(())
    }
}
