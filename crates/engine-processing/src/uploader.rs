use crate::error::UploadError;
use chrono::Utc;
use connectors::crm::CrmClient;
use engine_config::settings::SyncSettings;
use engine_core::{
    budget::{ExecutionBudget, Phase},
    metrics::Metrics,
    state::{
        StateStore,
        models::{CheckpointStatus, ProgressCheckpoint},
    },
};
use model::{outcome::UploadTotals, records::deal::DealRecord, work::chunk::ChunkPlan};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// One file's worth of upload work.
///
/// `records` is the file's full validated record sequence in source order,
/// with resolution already applied; `resume_offset` indexes into that
/// sequence. Keeping offsets over the validated sequence (rather than the
/// routable subset) makes them stable across invocations even when a
/// contact resolves on one run and not the next.
pub struct UploadRequest<'a> {
    pub source_key: &'a str,
    pub records: &'a [DealRecord],
    pub resume_offset: usize,
    pub plan: ChunkPlan,
}

#[derive(Debug)]
pub enum UploadOutcome {
    /// Every record in the file has been consumed.
    Completed { totals: UploadTotals },
    /// Budget ran out; the checkpoint marks where the next invocation
    /// picks up.
    Partial {
        totals: UploadTotals,
        checkpoint: ProgressCheckpoint,
    },
}

impl UploadOutcome {
    pub fn totals(&self) -> UploadTotals {
        match self {
            UploadOutcome::Completed { totals } | UploadOutcome::Partial { totals, .. } => *totals,
        }
    }
}

/// Pushes validated records to the CRM in fixed-size batches, strictly in
/// ascending chunk order, checkpointing at chunk boundaries and
/// periodically in between so an abrupt kill costs bounded rework.
pub struct UploadPipeline {
    crm: Arc<dyn CrmClient>,
    state: Arc<StateStore>,
    metrics: Metrics,
    batch_size: usize,
    pause: Duration,
    checkpoint_interval: usize,
}

impl UploadPipeline {
    pub fn new(
        crm: Arc<dyn CrmClient>,
        state: Arc<StateStore>,
        metrics: Metrics,
        settings: &SyncSettings,
    ) -> Self {
        UploadPipeline {
            crm,
            state,
            metrics,
            batch_size: settings.upload_batch_size.max(1),
            pause: settings.upload_pause,
            checkpoint_interval: settings.checkpoint_interval_batches.max(1),
        }
    }

    pub async fn upload(
        &self,
        req: UploadRequest<'_>,
        budget: &ExecutionBudget,
    ) -> Result<UploadOutcome, UploadError> {
        let plan = req.plan;
        let total = plan.total_records();
        let mut cursor = req.resume_offset.min(total);
        let mut totals = UploadTotals::default();

        let end_target = affordable_end(&plan, cursor, budget);
        if end_target <= cursor && cursor < total {
            // Not even one more chunk fits: stop before starting anything.
            let checkpoint = self
                .write_progress(&req, cursor, CheckpointStatus::Processing)
                .await?;
            return Ok(UploadOutcome::Partial { totals, checkpoint });
        }
        if end_target < total {
            info!(
                source_key = %req.source_key,
                end_target,
                total,
                "Budget affords only a prefix of the remaining records"
            );
        }

        let mut batch: Vec<DealRecord> = Vec::with_capacity(self.batch_size);
        let mut batches_since_checkpoint = 0usize;

        while cursor < end_target {
            let chunk_end = plan.chunk_bounds(plan.chunk_of(cursor)).end.min(end_target);

            while cursor < chunk_end {
                let record = &req.records[cursor];
                cursor += 1;

                if record.is_routable() {
                    batch.push(record.clone());
                } else {
                    totals.unroutable += 1;
                    self.metrics.add_unroutable(1);
                }

                // Batches never cross a chunk boundary.
                if batch.len() == self.batch_size || cursor == chunk_end {
                    if batch.is_empty() {
                        continue;
                    }
                    self.submit(&mut batch, &mut totals, req.source_key).await;
                    batches_since_checkpoint += 1;

                    let more_work = cursor < end_target;
                    if more_work && !self.pause.is_zero() {
                        sleep(self.pause).await;
                    }

                    if batches_since_checkpoint >= self.checkpoint_interval && more_work {
                        self.write_progress(&req, cursor, CheckpointStatus::Processing)
                            .await?;
                        batches_since_checkpoint = 0;
                    }

                    // The controller is advisory: check between batches,
                    // not only at chunk boundaries.
                    if cursor < chunk_end && budget.should_stop(Phase::Upload) {
                        let checkpoint = self
                            .write_progress(&req, cursor, CheckpointStatus::Processing)
                            .await?;
                        return Ok(UploadOutcome::Partial { totals, checkpoint });
                    }
                }
            }

            if cursor >= total {
                break;
            }

            // Chunk (or affordable-prefix) boundary mid-file.
            let checkpoint = self
                .write_progress(&req, cursor, CheckpointStatus::Processing)
                .await?;
            batches_since_checkpoint = 0;

            if cursor >= end_target || budget.should_stop(Phase::Upload) {
                return Ok(UploadOutcome::Partial { totals, checkpoint });
            }
        }

        // Mark completion durably before the caller records history, so a
        // kill between the two writes is recoverable without re-uploading.
        self.write_progress(&req, total, CheckpointStatus::Completed)
            .await?;
        Ok(UploadOutcome::Completed { totals })
    }

    /// Submits one batch, folding the CRM's answer into the totals. Batch
    /// failures are counted, never retried within the invocation.
    async fn submit(&self, batch: &mut Vec<DealRecord>, totals: &mut UploadTotals, source_key: &str) {
        let size = batch.len();
        match self.crm.create_deals(batch).await {
            Ok(created) => {
                let created = created.min(size);
                let shortfall = size - created;
                totals.succeeded += created;
                totals.failed += shortfall;
                self.metrics.add_succeeded(created as u64);
                if shortfall > 0 {
                    self.metrics.add_failed(shortfall as u64);
                    warn!(
                        source_key,
                        submitted = size,
                        created,
                        "CRM accepted the batch but rejected some records"
                    );
                }
            }
            Err(err) => {
                totals.failed += size;
                self.metrics.add_failed(size as u64);
                warn!(
                    source_key,
                    batch_size = size,
                    error = %err,
                    "Create batch failed; counting every record as failed"
                );
            }
        }
        self.metrics.increment_upload_batches();
        batch.clear();
    }

    async fn write_progress(
        &self,
        req: &UploadRequest<'_>,
        processed: usize,
        status: CheckpointStatus,
    ) -> Result<ProgressCheckpoint, UploadError> {
        let checkpoint = ProgressCheckpoint {
            source_key: req.source_key.to_string(),
            total_records: req.plan.total_records(),
            processed_records: processed,
            last_completed_chunk: req.plan.completed_chunks(processed),
            total_chunks: req.plan.total_chunks(),
            status,
            last_updated: Utc::now(),
        };

        self.state
            .save_checkpoint(&checkpoint)
            .await
            .map_err(|source| UploadError::Checkpoint {
                source_key: req.source_key.to_string(),
                source,
            })?;
        self.metrics.increment_checkpoint_writes();
        Ok(checkpoint)
    }
}

/// Where this invocation's walk of the file must end: the whole remainder
/// when it is affordable, otherwise the highest chunk boundary the
/// per-record cost estimate says fits. Aligning the prefix to chunk
/// boundaries keeps scheduled stops on clean resume points; mid-chunk
/// checkpoints only come from in-flight budget stops.
fn affordable_end(plan: &ChunkPlan, cursor: usize, budget: &ExecutionBudget) -> usize {
    let total = plan.total_records();
    let affordable = budget.records_affordable();
    if affordable >= total.saturating_sub(cursor) {
        return total;
    }

    let capped = cursor.saturating_add(affordable);
    let aligned = (capped / plan.chunk_size()) * plan.chunk_size();
    aligned.max(cursor).min(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use connectors::crm::{ContactMatch, CrmError};
    use connectors::store::fs::FsObjectStore;
    use engine_core::budget::BudgetParams;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    enum CreateMode {
        #[default]
        Accept,
        ShortfallBy(usize),
        FailBatch(usize),
    }

    #[derive(Default)]
    struct FakeCrm {
        mode: CreateMode,
        /// Names of records received, in submission order.
        received: Mutex<Vec<String>>,
        batch_sizes: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl CrmClient for FakeCrm {
        async fn lookup_contacts(&self, _keys: &[String]) -> Result<Vec<ContactMatch>, CrmError> {
            unreachable!("uploader never looks up contacts");
        }

        async fn create_deals(&self, records: &[DealRecord]) -> Result<usize, CrmError> {
            let batch_index = {
                let mut sizes = self.batch_sizes.lock().unwrap();
                sizes.push(records.len());
                sizes.len() - 1
            };

            if let CreateMode::FailBatch(fail_idx) = self.mode {
                if batch_index == fail_idx {
                    return Err(CrmError::Api {
                        status: 502,
                        message: "bad gateway".into(),
                    });
                }
            }

            self.received.lock().unwrap().extend(
                records
                    .iter()
                    .map(|r| r.property("name").and_then(|v| v.as_str()).unwrap_or("").to_string()),
            );

            match self.mode {
                CreateMode::ShortfallBy(n) => Ok(records.len().saturating_sub(n)),
                _ => Ok(records.len()),
            }
        }
    }

    fn record(i: usize, routable: bool) -> DealRecord {
        let mut properties = BTreeMap::new();
        properties.insert("name".to_string(), serde_json::Value::from(format!("r-{i}")));
        let mut record = DealRecord::new(format!("c-{i}"), properties);
        if routable {
            record.resolved_contact_id = Some(format!("id-{i}"));
        }
        record
    }

    fn records(n: usize) -> Vec<DealRecord> {
        (0..n).map(|i| record(i, true)).collect()
    }

    fn generous_budget() -> ExecutionBudget {
        ExecutionBudget::start(BudgetParams {
            total: Duration::from_secs(600),
            safety_margin: Duration::from_secs(1),
            per_record_cost: Duration::ZERO,
            ..BudgetParams::default()
        })
    }

    fn pipeline(crm: Arc<FakeCrm>, dir: &std::path::Path, settings: &SyncSettings) -> UploadPipeline {
        let state = Arc::new(StateStore::new(Arc::new(FsObjectStore::new(dir))));
        UploadPipeline::new(crm, state, Metrics::new(), settings)
    }

    fn settings(batch: usize) -> SyncSettings {
        SyncSettings::default()
            .with_batch_sizes(batch, 100)
            .without_pauses()
    }

    #[tokio::test]
    async fn small_file_completes_in_one_batch() {
        let dir = tempdir().unwrap();
        let crm = Arc::new(FakeCrm::default());
        let pipeline = pipeline(crm.clone(), dir.path(), &settings(100));

        let records = records(50);
        let outcome = pipeline
            .upload(
                UploadRequest {
                    source_key: "delta_a.csv",
                    records: &records,
                    resume_offset: 0,
                    plan: ChunkPlan::single(50),
                },
                &generous_budget(),
            )
            .await
            .unwrap();

        let totals = outcome.totals();
        assert!(matches!(outcome, UploadOutcome::Completed { .. }));
        assert_eq!(totals.succeeded, 50);
        assert_eq!(totals.failed, 0);
        assert_eq!(totals.unroutable, 0);
        assert_eq!(*crm.batch_sizes.lock().unwrap(), vec![50]);
    }

    #[tokio::test]
    async fn shortfall_in_accepted_batch_counts_as_failed() {
        let dir = tempdir().unwrap();
        let crm = Arc::new(FakeCrm {
            mode: CreateMode::ShortfallBy(3),
            ..FakeCrm::default()
        });
        let pipeline = pipeline(crm, dir.path(), &settings(100));

        let records = records(50);
        let outcome = pipeline
            .upload(
                UploadRequest {
                    source_key: "delta_a.csv",
                    records: &records,
                    resume_offset: 0,
                    plan: ChunkPlan::single(50),
                },
                &generous_budget(),
            )
            .await
            .unwrap();

        let totals = outcome.totals();
        assert_eq!(totals.succeeded, 47);
        assert_eq!(totals.failed, 3);
    }

    #[tokio::test]
    async fn failed_batch_counts_every_record_and_continues() {
        let dir = tempdir().unwrap();
        let crm = Arc::new(FakeCrm {
            mode: CreateMode::FailBatch(1),
            ..FakeCrm::default()
        });
        let pipeline = pipeline(crm.clone(), dir.path(), &settings(20));

        let records = records(60);
        let outcome = pipeline
            .upload(
                UploadRequest {
                    source_key: "delta_a.csv",
                    records: &records,
                    resume_offset: 0,
                    plan: ChunkPlan::single(60),
                },
                &generous_budget(),
            )
            .await
            .unwrap();

        let totals = outcome.totals();
        assert!(matches!(outcome, UploadOutcome::Completed { .. }));
        assert_eq!(totals.succeeded, 40);
        assert_eq!(totals.failed, 20);
        assert_eq!(totals.consumed(), 60, "conservation");
        assert_eq!(crm.batch_sizes.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unroutable_records_are_counted_not_uploaded() {
        let dir = tempdir().unwrap();
        let crm = Arc::new(FakeCrm::default());
        let pipeline = pipeline(crm.clone(), dir.path(), &settings(100));

        let records: Vec<DealRecord> = (0..50).map(|i| record(i, i >= 10)).collect();
        let outcome = pipeline
            .upload(
                UploadRequest {
                    source_key: "delta_a.csv",
                    records: &records,
                    resume_offset: 0,
                    plan: ChunkPlan::single(50),
                },
                &generous_budget(),
            )
            .await
            .unwrap();

        let totals = outcome.totals();
        assert_eq!(totals.unroutable, 10);
        assert_eq!(totals.succeeded, 40);
        assert_eq!(totals.consumed(), 50);
        let received = crm.received.lock().unwrap();
        assert!(!received.iter().any(|n| n == "r-5"));
        assert!(received.iter().any(|n| n == "r-10"));
    }

    #[tokio::test]
    async fn budget_stops_after_affordable_chunks() {
        let dir = tempdir().unwrap();
        let crm = Arc::new(FakeCrm::default());
        let mut settings = settings(500);
        settings.chunk_size = 2500;
        let pipeline = pipeline(crm.clone(), dir.path(), &settings);

        // ~6.6 s of upload budget at 1 ms/record × 0.9 affords ~5 900
        // records; aligned down to the chunk boundary that is 5 000.
        let budget = ExecutionBudget::start(BudgetParams {
            total: Duration::from_millis(8_600),
            safety_margin: Duration::from_millis(2_000),
            per_record_cost: Duration::from_millis(1),
            safety_factor: 0.9,
            ..BudgetParams::default()
        });

        let records = records(12_000);
        let outcome = pipeline
            .upload(
                UploadRequest {
                    source_key: "delta_big.csv",
                    records: &records,
                    resume_offset: 0,
                    plan: ChunkPlan::new(12_000, 2_500),
                },
                &budget,
            )
            .await
            .unwrap();

        match outcome {
            UploadOutcome::Partial { totals, checkpoint } => {
                assert_eq!(checkpoint.processed_records, 5_000);
                assert_eq!(checkpoint.last_completed_chunk, 2);
                assert_eq!(checkpoint.total_chunks, 5);
                assert_eq!(checkpoint.status, CheckpointStatus::Processing);
                assert_eq!(totals.succeeded, 5_000);
            }
            other => panic!("expected partial outcome, got {other:?}"),
        }

        let received = crm.received.lock().unwrap();
        assert_eq!(received.len(), 5_000);
        assert_eq!(received.last().map(String::as_str), Some("r-4999"));
    }

    #[tokio::test]
    async fn resume_uploads_only_the_tail() {
        let dir = tempdir().unwrap();
        let crm = Arc::new(FakeCrm::default());
        let mut settings = settings(500);
        settings.chunk_size = 2500;
        let pipeline = pipeline(crm.clone(), dir.path(), &settings);

        let records = records(12_000);
        let outcome = pipeline
            .upload(
                UploadRequest {
                    source_key: "delta_big.csv",
                    records: &records,
                    resume_offset: 5_000,
                    plan: ChunkPlan::new(12_000, 2_500),
                },
                &generous_budget(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, UploadOutcome::Completed { .. }));
        assert_eq!(outcome.totals().succeeded, 7_000);

        let received = crm.received.lock().unwrap();
        assert_eq!(received.len(), 7_000);
        assert_eq!(received.first().map(String::as_str), Some("r-5000"));
        assert!(!received.iter().any(|n| n == "r-4999"));
    }

    #[tokio::test]
    async fn intermediate_checkpoints_bound_rework() {
        let dir = tempdir().unwrap();
        let crm = Arc::new(FakeCrm::default());
        let mut settings = settings(10);
        settings.checkpoint_interval_batches = 2;
        let state = Arc::new(StateStore::new(Arc::new(FsObjectStore::new(dir.path()))));
        let metrics = Metrics::new();
        let pipeline = UploadPipeline::new(crm, state.clone(), metrics.clone(), &settings);

        let records = records(100);
        let outcome = pipeline
            .upload(
                UploadRequest {
                    source_key: "delta_a.csv",
                    records: &records,
                    resume_offset: 0,
                    plan: ChunkPlan::single(100),
                },
                &generous_budget(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, UploadOutcome::Completed { .. }));

        // Periodic writes after batches 2, 4, 6 and 8, plus the final
        // completion marker.
        assert_eq!(metrics.snapshot().checkpoint_writes, 5);

        let checkpoint = state.load_checkpoint("delta_a.csv").await.unwrap().unwrap();
        assert_eq!(checkpoint.processed_records, 100);
        assert_eq!(checkpoint.status, CheckpointStatus::Completed);
    }

    #[tokio::test]
    async fn exhausted_budget_starts_nothing() {
        let dir = tempdir().unwrap();
        let crm = Arc::new(FakeCrm::default());
        let pipeline = pipeline(crm.clone(), dir.path(), &settings(100));

        let budget = ExecutionBudget::start(BudgetParams {
            total: Duration::ZERO,
            safety_margin: Duration::ZERO,
            per_record_cost: Duration::from_millis(1),
            ..BudgetParams::default()
        });

        let records = records(50);
        let outcome = pipeline
            .upload(
                UploadRequest {
                    source_key: "delta_a.csv",
                    records: &records,
                    resume_offset: 0,
                    plan: ChunkPlan::single(50),
                },
                &budget,
            )
            .await
            .unwrap();

        match outcome {
            UploadOutcome::Partial { totals, checkpoint } => {
                assert_eq!(totals.consumed(), 0);
                assert_eq!(checkpoint.processed_records, 0);
            }
            other => panic!("expected partial outcome, got {other:?}"),
        }
        assert!(crm.batch_sizes.lock().unwrap().is_empty(), "no batch may start");
    }
}
