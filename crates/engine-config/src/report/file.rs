use chrono::{DateTime, Utc};
use model::outcome::UploadTotals;
use serde::Serialize;
use std::fmt::Write;
use std::time::Duration;

/// How processing of one file ended within this invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FileOutcome {
    /// Every record consumed; the file entered the processed history.
    Completed,
    /// Zero valid records after filtering; completed with no upload work.
    Empty,
    /// Budget ran out mid-file; a checkpoint marks the resume point.
    Partial { chunks_done: usize, chunks_total: usize },
    /// A hard error stopped this file; it stays eligible for rediscovery.
    Failed { message: String },
}

/// Per-file accounting, persisted to the state bucket and echoed to the
/// operator so convergence is visible invocation over invocation.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub source_key: String,
    /// Valid records in the file (rows with a contact key).
    pub total_records: usize,
    pub totals: UploadTotals,
    /// Rows dropped before the pipeline for a missing contact key.
    pub missing_contact_key: usize,
    pub outcome: FileOutcome,
    #[serde(skip)]
    pub elapsed: Duration,
    pub finished_at: DateTime<Utc>,
}

impl FileReport {
    pub fn success_rate(&self) -> f64 {
        let attempted = self.totals.consumed();
        if attempted == 0 {
            0.0
        } else {
            self.totals.succeeded as f64 * 100.0 / attempted as f64
        }
    }

    /// Human-readable block, one per processed file.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Processed file: {}", self.source_key);
        let _ = writeln!(out);
        let _ = writeln!(out, "Total records in file: {}", self.total_records);
        let _ = writeln!(out, "Uploaded successfully: {}", self.totals.succeeded);
        let _ = writeln!(out, "Failed in upload: {}", self.totals.failed);
        let _ = writeln!(out, "No resolvable contact: {}", self.totals.unroutable);
        let _ = writeln!(out, "Missing contact key: {}", self.missing_contact_key);
        let _ = writeln!(out);

        match &self.outcome {
            FileOutcome::Completed => {
                let _ = writeln!(out, "Success rate: {:.1}%", self.success_rate());
            }
            FileOutcome::Empty => {
                let _ = writeln!(out, "File contained no valid records.");
            }
            FileOutcome::Partial { chunks_done, chunks_total } => {
                let _ = writeln!(
                    out,
                    "Partial: {}/{} chunks done, {}/{} records; will resume next invocation.",
                    chunks_done,
                    chunks_total,
                    self.totals.consumed(),
                    self.total_records
                );
            }
            FileOutcome::Failed { message } => {
                let _ = writeln!(out, "Error: {message}");
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Executed at: {} ({:.1}s elapsed)",
            self.finished_at.to_rfc3339(),
            self.elapsed.as_secs_f64()
        );
        out
    }
}
