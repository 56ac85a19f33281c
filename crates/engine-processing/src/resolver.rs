use connectors::crm::{ContactMatch, CrmClient};
use engine_config::settings::SyncSettings;
use engine_core::{
    budget::{ExecutionBudget, Phase},
    metrics::Metrics,
};
use futures::future::join_all;
use model::records::resolution::ContactResolution;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// What one resolution pass produced.
#[derive(Debug)]
pub struct ResolutionOutcome {
    pub resolution: ContactResolution,
    /// Lookup batches that failed and degraded to zero results.
    pub failed_batches: usize,
    /// True when the sub-budget ran out before every batch was attempted.
    pub budget_exhausted: bool,
}

/// Translates external contact keys into CRM-native ids.
///
/// Lookups run in waves of a few concurrent fixed-size batches, with a
/// pause between waves for the CRM's rate limits. The sub-budget is a hard
/// ceiling checked before each wave: whatever resolved by then is the
/// result, and unresolved keys are indistinguishable from unknown ones.
pub struct ContactResolver {
    crm: Arc<dyn CrmClient>,
    metrics: Metrics,
    batch_size: usize,
    max_concurrent: usize,
    pause: Duration,
}

impl ContactResolver {
    pub fn new(crm: Arc<dyn CrmClient>, metrics: Metrics, settings: &SyncSettings) -> Self {
        ContactResolver {
            crm,
            metrics,
            batch_size: settings.contact_batch_size.max(1),
            max_concurrent: settings.max_concurrent_lookups.max(1),
            pause: settings.lookup_pause,
        }
    }

    pub async fn resolve(
        &self,
        keys: &[String],
        sub_budget: Duration,
        budget: &ExecutionBudget,
    ) -> ResolutionOutcome {
        let started = Instant::now();
        let requested: HashSet<&str> = keys.iter().map(String::as_str).collect();

        let mut outcome = ResolutionOutcome {
            resolution: ContactResolution::new(),
            failed_batches: 0,
            budget_exhausted: false,
        };

        let batches: Vec<&[String]> = keys.chunks(self.batch_size).collect();
        for (wave_idx, wave) in batches.chunks(self.max_concurrent).enumerate() {
            if started.elapsed() >= sub_budget || budget.should_stop(Phase::Resolution) {
                outcome.budget_exhausted = true;
                warn!(
                    resolved = outcome.resolution.len(),
                    requested = keys.len(),
                    "Resolution budget exhausted; remaining keys stay unresolved"
                );
                break;
            }

            if wave_idx > 0 && !self.pause.is_zero() {
                sleep(self.pause).await;
            }

            let results = join_all(wave.iter().map(|batch| self.lookup(batch))).await;
            for matches in results {
                match matches {
                    Some(matches) => {
                        for ContactMatch { contact_key, crm_id } in matches {
                            // Guard the subset guarantee: never map a key
                            // this pass did not ask for.
                            if requested.contains(contact_key.as_str()) {
                                outcome.resolution.insert(contact_key, crm_id);
                            }
                        }
                    }
                    None => outcome.failed_batches += 1,
                }
            }
        }

        debug!(
            requested = keys.len(),
            resolved = outcome.resolution.len(),
            failed_batches = outcome.failed_batches,
            "Contact resolution finished"
        );
        outcome
    }

    /// One lookup batch. Failure degrades to "no results" — resolution
    /// never aborts the invocation.
    async fn lookup(&self, keys: &[String]) -> Option<Vec<ContactMatch>> {
        self.metrics.increment_lookup_batches();
        match self.crm.lookup_contacts(keys).await {
            Ok(matches) => Some(matches),
            Err(err) => {
                warn!(
                    batch_size = keys.len(),
                    error = %err,
                    "Contact lookup batch failed; its keys stay unresolved"
                );
                self.metrics.increment_lookup_failures();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use connectors::crm::CrmError;
    use engine_core::budget::BudgetParams;
    use model::records::deal::DealRecord;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolves every key it is asked about, unless the batch contains a
    /// poison key, in which case the whole batch errors.
    struct FakeCrm {
        poison: Option<String>,
        calls: AtomicUsize,
    }

    impl FakeCrm {
        fn new() -> Self {
            FakeCrm {
                poison: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn with_poison(key: &str) -> Self {
            FakeCrm {
                poison: Some(key.to_string()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CrmClient for FakeCrm {
        async fn lookup_contacts(&self, keys: &[String]) -> Result<Vec<ContactMatch>, CrmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(poison) = &self.poison {
                if keys.contains(poison) {
                    return Err(CrmError::Api {
                        status: 500,
                        message: "boom".into(),
                    });
                }
            }
            Ok(keys
                .iter()
                .map(|k| ContactMatch {
                    contact_key: k.clone(),
                    crm_id: format!("id-{k}"),
                })
                .collect())
        }

        async fn create_deals(&self, _records: &[DealRecord]) -> Result<usize, CrmError> {
            unreachable!("resolver never creates deals");
        }
    }

    fn settings() -> SyncSettings {
        SyncSettings::default()
            .with_batch_sizes(100, 2)
            .without_pauses()
    }

    fn fresh_budget() -> ExecutionBudget {
        ExecutionBudget::start(BudgetParams::default())
    }

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("c-{i}")).collect()
    }

    #[tokio::test]
    async fn resolves_all_keys_across_batches() {
        let crm = Arc::new(FakeCrm::new());
        let resolver = ContactResolver::new(crm.clone(), Metrics::new(), &settings());

        let keys = keys(5);
        let outcome = resolver
            .resolve(&keys, Duration::from_secs(60), &fresh_budget())
            .await;

        assert_eq!(outcome.resolution.len(), 5);
        assert_eq!(outcome.failed_batches, 0);
        assert!(!outcome.budget_exhausted);
        // 5 keys at batch size 2 = 3 batches.
        assert_eq!(crm.calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.resolution.get("c-3"), Some("id-c-3"));
    }

    #[tokio::test]
    async fn failed_batch_degrades_without_aborting() {
        let crm = Arc::new(FakeCrm::with_poison("c-0"));
        let resolver = ContactResolver::new(crm, Metrics::new(), &settings());

        let keys = keys(5);
        let outcome = resolver
            .resolve(&keys, Duration::from_secs(60), &fresh_budget())
            .await;

        // The batch containing c-0 (c-0, c-1) failed; the rest resolved.
        assert_eq!(outcome.failed_batches, 1);
        assert_eq!(outcome.resolution.len(), 3);
        assert!(!outcome.resolution.contains("c-0"));
        assert!(!outcome.resolution.contains("c-1"));
        assert!(outcome.resolution.contains("c-4"));
    }

    #[tokio::test]
    async fn exhausted_sub_budget_returns_partial_mapping() {
        let crm = Arc::new(FakeCrm::new());
        let resolver = ContactResolver::new(crm.clone(), Metrics::new(), &settings());

        let keys = keys(100);
        let outcome = resolver.resolve(&keys, Duration::ZERO, &fresh_budget()).await;

        assert!(outcome.budget_exhausted);
        assert!(outcome.resolution.is_empty());
        assert_eq!(crm.calls.load(Ordering::SeqCst), 0, "no wave may start");
    }

    #[tokio::test]
    async fn empty_key_set_is_a_no_op() {
        let crm = Arc::new(FakeCrm::new());
        let resolver = ContactResolver::new(crm.clone(), Metrics::new(), &settings());

        let outcome = resolver
            .resolve(&[], Duration::from_secs(60), &fresh_budget())
            .await;

        assert!(outcome.resolution.is_empty());
        assert_eq!(crm.calls.load(Ordering::SeqCst), 0);
    }
}
