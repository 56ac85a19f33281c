use crate::{error::FileError, status::RunStatus};
use chrono::Utc;
use connectors::{
    crm::CrmClient,
    file::csv::CsvDealSource,
    store::{ObjectStore, StoreError},
};
use engine_config::{
    report::{FileOutcome, FileReport, RunReport},
    settings::SyncSettings,
};
use engine_core::{
    budget::{ExecutionBudget, Phase},
    metrics::Metrics,
    state::{
        StateStore,
        models::{InvocationLease, ProcessedHistory},
    },
};
use engine_processing::{
    resolver::ContactResolver,
    scheduler::{self, DiscoveryFilter},
    uploader::{UploadOutcome, UploadPipeline, UploadRequest},
};
use model::{outcome::UploadTotals, work::chunk::ChunkPlan, work::item::WorkItem};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// What one invocation returns to the entry-point wrapper.
#[derive(Debug)]
pub struct RunSummary {
    pub status: RunStatus,
    pub report: RunReport,
}

/// How processing of one queue item ended, internally.
enum ItemOutcome {
    Completed(String),
    Empty(String),
    /// Bookkeeping for a file a previous run finished but could not record.
    AlreadyDone,
    Partial {
        file: String,
        chunks_done: usize,
        chunks_total: usize,
        progressed: bool,
    },
}

/// The per-invocation driver: verify connectivity, take the lease, build
/// the work queue, process until the budget is exhausted, persist state at
/// every exit path, and summarize.
///
/// All collaborators are injected; the engine owns no global state, which
/// keeps every component testable against fakes.
pub struct SyncEngine {
    source: Arc<dyn ObjectStore>,
    state: Arc<StateStore>,
    crm: Arc<dyn CrmClient>,
    settings: SyncSettings,
    csv: CsvDealSource,
    metrics: Metrics,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn ObjectStore>,
        state_bucket: Arc<dyn ObjectStore>,
        crm: Arc<dyn CrmClient>,
        settings: SyncSettings,
    ) -> Self {
        SyncEngine {
            source,
            state: Arc::new(StateStore::new(state_bucket)),
            crm,
            settings,
            csv: CsvDealSource::default(),
            metrics: Metrics::new(),
        }
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics.clone()
    }

    pub fn state(&self) -> Arc<StateStore> {
        self.state.clone()
    }

    /// One bounded invocation. Never panics the caller's transport: every
    /// failure mode folds into the returned status.
    pub async fn run(&self) -> RunSummary {
        let run_id = format!("run-{}", Uuid::new_v4().simple());
        let budget = ExecutionBudget::start(self.settings.budget_params());
        let mut report = RunReport::new(&run_id);

        info!(
            run_id = %run_id,
            budget_s = self.settings.total_budget.as_secs(),
            "Starting sync invocation"
        );

        if let Err(err) = self.probe().await {
            error!(error = %err, "Store connectivity check failed; aborting");
            report.elapsed = budget.elapsed();
            return RunSummary {
                status: RunStatus::ConnectivityError,
                report,
            };
        }

        match self.acquire_lease(&run_id).await {
            Ok(true) => {}
            Ok(false) => {
                report.elapsed = budget.elapsed();
                return RunSummary {
                    status: RunStatus::ConcurrentRun,
                    report,
                };
            }
            Err(err) => {
                error!(error = %err, "Could not take the invocation lease");
                report.elapsed = budget.elapsed();
                return RunSummary {
                    status: RunStatus::ConnectivityError,
                    report,
                };
            }
        }

        let status = self.run_queue(&budget, &mut report).await;

        if let Err(err) = self.state.clear_lease().await {
            warn!(error = %err, "Failed to release invocation lease; it will expire");
        }

        report.elapsed = budget.elapsed();
        info!(run_id = %run_id, status = %status, "Invocation finished");
        RunSummary { status, report }
    }

    async fn run_queue(&self, budget: &ExecutionBudget, report: &mut RunReport) -> RunStatus {
        let mut history = match self.state.load_history().await {
            Ok(history) => history,
            Err(err) => {
                error!(error = %err, "Failed to load processed history");
                return RunStatus::ConnectivityError;
            }
        };

        let discovered = match self.discover().await {
            Ok(keys) => keys,
            Err(err) => {
                error!(error = %err, "Failed to list source bucket");
                return RunStatus::ConnectivityError;
            }
        };

        let partials = match self.state.list_partials().await {
            Ok(partials) => partials,
            Err(err) => {
                error!(error = %err, "Failed to list resumable checkpoints");
                return RunStatus::ConnectivityError;
            }
        };

        let queue = scheduler::build_queue(&discovered, &history, &partials);
        if queue.is_empty() {
            info!("No new or resumable files");
            return RunStatus::NoNewWork;
        }
        info!(
            items = queue.len(),
            resuming = queue.iter().filter(|i| i.is_resuming()).count(),
            "Work queue built"
        );

        let mut last_completed: Option<String> = None;
        let mut last_error: Option<(String, String)> = None;
        let mut made_progress = false;

        for item in &queue {
            if budget.should_stop(Phase::Discovery) {
                info!(
                    pending = queue.len() - report.files.len(),
                    "Budget exhausted between files; stopping"
                );
                break;
            }

            match self.process_item(item, budget, report, &mut history).await {
                Ok(ItemOutcome::Completed(file)) | Ok(ItemOutcome::Empty(file)) => {
                    last_completed = Some(file);
                    made_progress = true;
                }
                Ok(ItemOutcome::AlreadyDone) => {}
                Ok(ItemOutcome::Partial {
                    file,
                    chunks_done,
                    chunks_total,
                    progressed,
                }) => {
                    if !made_progress && !progressed {
                        return RunStatus::InsufficientTimeRetry;
                    }
                    return RunStatus::Partial {
                        file,
                        chunks_done,
                        chunks_total,
                    };
                }
                Err(err) => {
                    error!(source_key = %item.source_key, error = %err, "File failed; continuing with the next one");
                    let file_report = FileReport {
                        source_key: item.source_key.clone(),
                        total_records: item.known_total_records.unwrap_or(0),
                        totals: UploadTotals::default(),
                        missing_contact_key: 0,
                        outcome: FileOutcome::Failed {
                            message: err.to_string(),
                        },
                        elapsed: budget.elapsed(),
                        finished_at: Utc::now(),
                    };
                    self.persist_report(&file_report).await;
                    report.push(file_report);
                    last_error = Some((item.source_key.clone(), err.to_string()));
                }
            }
        }

        if let Some((file, message)) = last_error {
            return RunStatus::ProcessingError { file, message };
        }
        match last_completed {
            Some(file) => RunStatus::Completed {
                file,
                elapsed: budget.elapsed(),
            },
            None => {
                if made_progress {
                    RunStatus::NoNewWork
                } else {
                    RunStatus::InsufficientTimeRetry
                }
            }
        }
    }

    async fn process_item(
        &self,
        item: &WorkItem,
        budget: &ExecutionBudget,
        report: &mut RunReport,
        history: &mut ProcessedHistory,
    ) -> Result<ItemOutcome, FileError> {
        let started = Instant::now();
        let key = item.source_key.as_str();
        info!(
            source_key = key,
            kind = ?item.kind,
            resume_offset = item.resume_offset,
            "Processing file"
        );

        // A Completed checkpoint with no history entry means a previous run
        // died between the two writes; finish the bookkeeping and move on.
        if let Some(checkpoint) = self.state.load_checkpoint(key).await? {
            if checkpoint.is_complete() {
                info!(source_key = key, "Found completed checkpoint; recording to history");
                history.insert(key);
                self.state.save_history(history).await?;
                self.state.delete_checkpoint(key).await?;
                return Ok(ItemOutcome::AlreadyDone);
            }
        }

        let Some(bytes) = self.source.get(key).await? else {
            return Err(FileError::SourceGone);
        };
        let summary = self.csv.parse(&bytes)?;
        self.metrics.add_rejected_rows(summary.missing_contact_key as u64);

        if summary.records.is_empty() {
            return self
                .complete_empty_file(item, summary.missing_contact_key, started, report, history)
                .await;
        }

        let mut records = summary.records;
        let total = records.len();

        // Re-resolve on every invocation: resolutions are never persisted.
        let contact_keys: Vec<String> = records
            .iter()
            .map(|r| r.contact_key.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();

        let resolver = ContactResolver::new(self.crm.clone(), self.metrics.clone(), &self.settings);
        let resolution = resolver
            .resolve(&contact_keys, budget.resolution_budget(), budget)
            .await;
        info!(
            source_key = key,
            contacts = contact_keys.len(),
            resolved = resolution.resolution.len(),
            failed_batches = resolution.failed_batches,
            "Contacts resolved"
        );

        for record in &mut records {
            if let Some(id) = resolution.resolution.get(&record.contact_key) {
                record.resolved_contact_id = Some(id.to_string());
            }
        }

        let plan = if total > self.settings.large_file_threshold {
            ChunkPlan::new(total, self.settings.chunk_size)
        } else {
            ChunkPlan::single(total)
        };

        let pipeline = UploadPipeline::new(
            self.crm.clone(),
            self.state.clone(),
            self.metrics.clone(),
            &self.settings,
        );
        let outcome = pipeline
            .upload(
                UploadRequest {
                    source_key: key,
                    records: &records,
                    resume_offset: item.resume_offset.min(total),
                    plan,
                },
                budget,
            )
            .await?;

        match outcome {
            UploadOutcome::Completed { totals } => {
                history.insert(key);
                self.state.save_history(history).await?;
                self.state.delete_checkpoint(key).await?;

                let file_report = FileReport {
                    source_key: key.to_string(),
                    total_records: total,
                    totals,
                    missing_contact_key: summary.missing_contact_key,
                    outcome: FileOutcome::Completed,
                    elapsed: started.elapsed(),
                    finished_at: Utc::now(),
                };
                info!(
                    source_key = key,
                    succeeded = totals.succeeded,
                    failed = totals.failed,
                    unroutable = totals.unroutable,
                    "File completed"
                );
                self.persist_report(&file_report).await;
                report.push(file_report);
                Ok(ItemOutcome::Completed(key.to_string()))
            }
            UploadOutcome::Partial { totals, checkpoint } => {
                let file_report = FileReport {
                    source_key: key.to_string(),
                    total_records: total,
                    totals,
                    missing_contact_key: summary.missing_contact_key,
                    outcome: FileOutcome::Partial {
                        chunks_done: checkpoint.last_completed_chunk,
                        chunks_total: checkpoint.total_chunks,
                    },
                    elapsed: started.elapsed(),
                    finished_at: Utc::now(),
                };
                info!(
                    source_key = key,
                    processed = checkpoint.processed_records,
                    total,
                    "File left partial; checkpointed for resumption"
                );
                self.persist_report(&file_report).await;
                report.push(file_report);
                Ok(ItemOutcome::Partial {
                    file: key.to_string(),
                    chunks_done: checkpoint.last_completed_chunk,
                    chunks_total: checkpoint.total_chunks,
                    progressed: totals.consumed() > 0,
                })
            }
        }
    }

    /// Zero valid records: the file is immediately processed, with no
    /// checkpoint to write (or keep).
    async fn complete_empty_file(
        &self,
        item: &WorkItem,
        missing_contact_key: usize,
        started: Instant,
        report: &mut RunReport,
        history: &mut ProcessedHistory,
    ) -> Result<ItemOutcome, FileError> {
        let key = item.source_key.as_str();
        warn!(source_key = key, missing_contact_key, "File has no valid records");

        history.insert(key);
        self.state.save_history(history).await?;
        if item.is_resuming() {
            self.state.delete_checkpoint(key).await?;
        }

        let file_report = FileReport {
            source_key: key.to_string(),
            total_records: 0,
            totals: UploadTotals::default(),
            missing_contact_key,
            outcome: FileOutcome::Empty,
            elapsed: started.elapsed(),
            finished_at: Utc::now(),
        };
        self.persist_report(&file_report).await;
        report.push(file_report);
        Ok(ItemOutcome::Empty(key.to_string()))
    }

    async fn probe(&self) -> Result<(), FileError> {
        self.source.list(&self.settings.source_prefix).await?;
        self.state.probe().await?;
        Ok(())
    }

    async fn discover(&self) -> Result<Vec<String>, StoreError> {
        let filter = DiscoveryFilter::from_settings(&self.settings);
        let keys = self.source.list(&self.settings.source_prefix).await?;
        Ok(keys.into_iter().filter(|key| filter.matches(key)).collect())
    }

    /// Best-effort lease: the store has no compare-and-swap, so this
    /// narrows the concurrent-invocation window rather than closing it.
    async fn acquire_lease(&self, run_id: &str) -> Result<bool, engine_core::error::StateError> {
        let now = Utc::now();
        if let Some(lease) = self.state.load_lease().await? {
            if !lease.is_expired_at(now) && lease.holder != run_id {
                warn!(holder = %lease.holder, expires_at = %lease.expires_at, "Lease held by another invocation");
                return Ok(false);
            }
        }

        let ttl = chrono::Duration::from_std(self.settings.lease_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(900));
        self.state
            .save_lease(&InvocationLease {
                holder: run_id.to_string(),
                expires_at: now + ttl,
            })
            .await?;
        Ok(true)
    }

    async fn persist_report(&self, file_report: &FileReport) {
        if let Err(err) = self
            .state
            .save_report(&file_report.source_key, &file_report.render())
            .await
        {
            // Reports are an operator convenience, never worth failing a run.
            warn!(source_key = %file_report.source_key, error = %err, "Failed to persist execution report");
        }
    }
}
