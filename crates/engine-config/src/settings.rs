use engine_core::budget::BudgetParams;
use std::time::Duration;

/// All tunables for one invocation, in one place.
///
/// Defaults are sized for a platform that kills the process at ten
/// minutes. Every timing and sizing constant the engine consults lives
/// here; engine code never hard-codes one.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Wall-clock budget for the invocation, below the platform kill time.
    pub total_budget: Duration,

    /// Tail reserved for final checkpoint writes. Size generously relative
    /// to one batch's worst-case latency: in-flight calls are not cancelled.
    pub safety_margin: Duration,

    /// Records per create-batch. Bound by the CRM's accepted batch size.
    pub upload_batch_size: usize,

    /// Keys per lookup-batch. Bound by the CRM's batch-read limit.
    pub contact_batch_size: usize,

    /// Concurrent lookup batches per wave.
    pub max_concurrent_lookups: usize,

    /// Files with more valid records than this are chunked; smaller files
    /// take the direct-upload path.
    pub large_file_threshold: usize,

    /// Records per chunk, the unit of checkpointing for large files.
    pub chunk_size: usize,

    /// Empirical per-record upload cost driving affordability estimates.
    pub per_record_cost: Duration,

    /// Shrinks affordability estimates to absorb estimation error.
    pub safety_factor: f64,

    /// Fraction of the total budget the resolution phase may use.
    pub resolution_fraction: f64,

    /// Absolute ceiling on the resolution phase.
    pub resolution_cap: Duration,

    /// Pause between lookup waves, for the CRM's rate limits.
    pub lookup_pause: Duration,

    /// Pause between create batches, counted against the budget.
    pub upload_pause: Duration,

    /// Persist an intermediate checkpoint every this many batches, so an
    /// abrupt kill costs at most that much rework.
    pub checkpoint_interval_batches: usize,

    /// Only source keys with this prefix are considered for sync.
    pub source_prefix: String,

    /// Only source keys with this suffix are considered for sync.
    pub source_suffix: String,

    /// Per-request timeout for CRM calls, distinct from the invocation
    /// deadline.
    pub request_timeout: Duration,

    /// How long an invocation lease stays live without being released.
    pub lease_ttl: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            total_budget: Duration::from_secs(540),
            safety_margin: Duration::from_secs(20),
            upload_batch_size: 100,
            contact_batch_size: 100,
            max_concurrent_lookups: 4,
            large_file_threshold: 2000,
            chunk_size: 2500,
            per_record_cost: Duration::from_millis(8),
            safety_factor: 0.85,
            resolution_fraction: 0.6,
            resolution_cap: Duration::from_secs(120),
            lookup_pause: Duration::from_millis(250),
            upload_pause: Duration::from_millis(500),
            checkpoint_interval_batches: 5,
            source_prefix: "delta_".to_string(),
            source_suffix: ".csv".to_string(),
            request_timeout: Duration::from_secs(30),
            lease_ttl: Duration::from_secs(900),
        }
    }
}

impl SyncSettings {
    pub fn with_total_budget(mut self, total: Duration) -> Self {
        self.total_budget = total;
        self
    }

    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_batch_sizes(mut self, upload: usize, contact: usize) -> Self {
        self.upload_batch_size = upload;
        self.contact_batch_size = contact;
        self
    }

    /// No inter-batch pauses; for tests and stores without rate limits.
    pub fn without_pauses(mut self) -> Self {
        self.lookup_pause = Duration::ZERO;
        self.upload_pause = Duration::ZERO;
        self
    }

    pub fn budget_params(&self) -> BudgetParams {
        BudgetParams {
            total: self.total_budget,
            safety_margin: self.safety_margin,
            resolution_fraction: self.resolution_fraction,
            resolution_cap: self.resolution_cap,
            per_record_cost: self.per_record_cost,
            safety_factor: self.safety_factor,
        }
    }
}
