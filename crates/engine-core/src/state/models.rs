use chrono::{DateTime, Utc};
use model::work::item::WorkItem;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointStatus {
    Processing,
    Completed,
}

/// Durable progress record for one source file.
///
/// Field names are the cross-invocation contract; changing them orphans
/// every checkpoint already in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressCheckpoint {
    pub source_key: String,
    pub total_records: usize,
    /// Records consumed so far. Invariant: never exceeds `total_records`,
    /// and never decreases across writes for the same key.
    pub processed_records: usize,
    pub last_completed_chunk: usize,
    pub total_chunks: usize,
    pub status: CheckpointStatus,
    pub last_updated: DateTime<Utc>,
}

impl ProgressCheckpoint {
    pub fn is_complete(&self) -> bool {
        self.status == CheckpointStatus::Completed
    }

    pub fn progress_fraction(&self) -> f64 {
        if self.total_records == 0 {
            1.0
        } else {
            self.processed_records as f64 / self.total_records as f64
        }
    }

    /// The resumable work item this checkpoint describes.
    pub fn to_work_item(&self) -> WorkItem {
        WorkItem::resuming(
            self.source_key.clone(),
            self.processed_records,
            self.total_records,
        )
    }
}

/// Source keys fully synchronized, serialized as a bare JSON list for
/// compatibility with stores written by earlier revisions of this system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessedHistory {
    keys: Vec<String>,
}

impl ProcessedHistory {
    pub fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }

    /// Append-only; inserting a present key is a no-op.
    pub fn insert(&mut self, key: impl Into<String>) {
        let key = key.into();
        if !self.contains(&key) {
            self.keys.push(key);
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

/// Best-effort mutual exclusion between invocations.
///
/// The store has no compare-and-swap, so this narrows the overlap window
/// rather than closing it; serial triggering remains the real guarantee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationLease {
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

impl InvocationLease {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
