use serde::Serialize;

/// Per-file accounting for one invocation's worth of upload work.
///
/// `succeeded + failed + unroutable` covers every record consumed by the
/// pipeline; once a file reaches completion (possibly across several
/// invocations) the three together equal the file's valid record count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadTotals {
    /// Records the CRM reports as created.
    pub succeeded: usize,
    /// Records in failed batches plus per-item shortfalls inside accepted
    /// batches. Not retried within the invocation.
    pub failed: usize,
    /// Records whose contact key did not resolve this invocation. A
    /// data-quality outcome, tallied separately from upload failures.
    pub unroutable: usize,
}

impl UploadTotals {
    pub fn consumed(&self) -> usize {
        self.succeeded + self.failed + self.unroutable
    }

    pub fn merge(&mut self, other: UploadTotals) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.unroutable += other.unroutable;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_adds_counts() {
        let mut totals = UploadTotals {
            succeeded: 10,
            failed: 2,
            unroutable: 1,
        };
        totals.merge(UploadTotals {
            succeeded: 5,
            failed: 0,
            unroutable: 3,
        });
        assert_eq!(totals.succeeded, 15);
        assert_eq!(totals.failed, 2);
        assert_eq!(totals.unroutable, 4);
        assert_eq!(totals.consumed(), 21);
    }
}
