use crate::report::file::FileReport;
use model::outcome::UploadTotals;
use serde::Serialize;
use std::fmt::Write;
use std::time::Duration;

/// Everything one invocation did, file by file.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub files: Vec<FileReport>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RunReport {
    pub fn new(run_id: impl Into<String>) -> Self {
        RunReport {
            run_id: run_id.into(),
            files: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn push(&mut self, file: FileReport) {
        self.files.push(file);
    }

    pub fn totals(&self) -> UploadTotals {
        let mut totals = UploadTotals::default();
        for file in &self.files {
            totals.merge(file.totals);
        }
        totals
    }

    pub fn rejected_rows(&self) -> usize {
        self.files.iter().map(|f| f.missing_contact_key).sum()
    }

    pub fn render_summary(&self) -> String {
        let totals = self.totals();
        let mut out = String::new();
        let _ = writeln!(out, "Run {}: {} file(s) touched", self.run_id, self.files.len());
        let _ = writeln!(
            out,
            "  succeeded: {}  failed: {}  unroutable: {}  rejected rows: {}",
            totals.succeeded,
            totals.failed,
            totals.unroutable,
            self.rejected_rows()
        );
        let _ = writeln!(out, "  elapsed: {:.1}s", self.elapsed.as_secs_f64());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::file::FileOutcome;
    use chrono::Utc;

    #[test]
    fn totals_accumulate_across_files() {
        let mut run = RunReport::new("run-1");
        for succeeded in [10, 20] {
            run.push(FileReport {
                source_key: format!("delta_{succeeded}.csv"),
                total_records: succeeded + 1,
                totals: UploadTotals {
                    succeeded,
                    failed: 1,
                    unroutable: 0,
                },
                missing_contact_key: 3,
                outcome: FileOutcome::Completed,
                elapsed: Duration::from_secs(1),
                finished_at: Utc::now(),
            });
        }

        let totals = run.totals();
        assert_eq!(totals.succeeded, 30);
        assert_eq!(totals.failed, 2);
        assert_eq!(run.rejected_rows(), 6);
        assert!(run.render_summary().contains("2 file(s)"));
    }
}
