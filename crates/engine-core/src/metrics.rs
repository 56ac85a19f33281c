use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    records_succeeded: AtomicU64,
    records_failed: AtomicU64,
    records_unroutable: AtomicU64,
    rows_rejected: AtomicU64,
    upload_batches: AtomicU64,
    lookup_batches: AtomicU64,
    lookup_batch_failures: AtomicU64,
    checkpoint_writes: AtomicU64,
}

/// Cheap shared counters for one invocation. Cloning shares the counters.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub records_succeeded: u64,
    pub records_failed: u64,
    pub records_unroutable: u64,
    pub rows_rejected: u64,
    pub upload_batches: u64,
    pub lookup_batches: u64,
    pub lookup_batch_failures: u64,
    pub checkpoint_writes: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn add_succeeded(&self, count: u64) {
        self.inner.records_succeeded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_failed(&self, count: u64) {
        self.inner.records_failed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_unroutable(&self, count: u64) {
        self.inner.records_unroutable.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_rejected_rows(&self, count: u64) {
        self.inner.rows_rejected.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_upload_batches(&self) {
        self.inner.upload_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_lookup_batches(&self) {
        self.inner.lookup_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_lookup_failures(&self) {
        self.inner.lookup_batch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_checkpoint_writes(&self) {
        self.inner.checkpoint_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_succeeded: self.inner.records_succeeded.load(Ordering::Relaxed),
            records_failed: self.inner.records_failed.load(Ordering::Relaxed),
            records_unroutable: self.inner.records_unroutable.load(Ordering::Relaxed),
            rows_rejected: self.inner.rows_rejected.load(Ordering::Relaxed),
            upload_batches: self.inner.upload_batches.load(Ordering::Relaxed),
            lookup_batches: self.inner.lookup_batches.load(Ordering::Relaxed),
            lookup_batch_failures: self.inner.lookup_batch_failures.load(Ordering::Relaxed),
            checkpoint_writes: self.inner.checkpoint_writes.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
