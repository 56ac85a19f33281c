use serde::{Deserialize, Serialize};

/// Whether a work item is a freshly discovered file or a resumption of a
/// file that was left half-done by an earlier invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkKind {
    New,
    Resuming,
}

/// One unit of schedulable work: a source file plus where to pick it up.
///
/// Invariant: a source key has at most one live work item at a time, and
/// `Resuming` implies a progress checkpoint exists for the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub source_key: String,
    pub kind: WorkKind,
    /// Record index already processed; records `[0, resume_offset)` must
    /// never be re-uploaded.
    pub resume_offset: usize,
    /// Filled once the file has been fully read at least once.
    pub known_total_records: Option<usize>,
}

impl WorkItem {
    pub fn new(source_key: impl Into<String>) -> Self {
        WorkItem {
            source_key: source_key.into(),
            kind: WorkKind::New,
            resume_offset: 0,
            known_total_records: None,
        }
    }

    pub fn resuming(source_key: impl Into<String>, resume_offset: usize, total_records: usize) -> Self {
        WorkItem {
            source_key: source_key.into(),
            kind: WorkKind::Resuming,
            resume_offset,
            known_total_records: Some(total_records),
        }
    }

    pub fn is_resuming(&self) -> bool {
        self.kind == WorkKind::Resuming
    }

    /// Records still to process, when the total is known.
    pub fn remaining_records(&self) -> Option<usize> {
        self.known_total_records
            .map(|total| total.saturating_sub(self.resume_offset))
    }
}
