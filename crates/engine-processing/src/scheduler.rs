use engine_core::state::models::{ProcessedHistory, ProgressCheckpoint};
use engine_config::settings::SyncSettings;
use model::work::item::WorkItem;
use std::collections::HashSet;
use tracing::debug;

/// Which discovered keys are eligible source files at all.
#[derive(Debug, Clone)]
pub struct DiscoveryFilter {
    prefix: String,
    suffix: String,
}

impl DiscoveryFilter {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        DiscoveryFilter {
            prefix: settings.source_prefix.clone(),
            suffix: settings.source_suffix.clone(),
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        key.starts_with(&self.prefix) && key.ends_with(&self.suffix)
    }
}

/// Builds one invocation's ordered work queue.
///
/// Resuming items come first so the number of half-done files stays
/// bounded, then new discoveries; both groups in lexicographic key order,
/// which for these delta drops is also chronological. Keys already in the
/// processed history never enter the queue, and a key appears at most once.
pub fn build_queue(
    discovered: &[String],
    history: &ProcessedHistory,
    partials: &[ProgressCheckpoint],
) -> Vec<WorkItem> {
    let mut resuming: Vec<WorkItem> = partials
        .iter()
        .filter(|cp| !cp.is_complete())
        .filter(|cp| !history.contains(&cp.source_key))
        .map(ProgressCheckpoint::to_work_item)
        .collect();
    resuming.sort_by(|a, b| a.source_key.cmp(&b.source_key));
    resuming.dedup_by(|a, b| a.source_key == b.source_key);

    let resuming_keys: HashSet<&str> =
        resuming.iter().map(|item| item.source_key.as_str()).collect();

    let mut fresh: Vec<WorkItem> = discovered
        .iter()
        .filter(|key| !history.contains(key))
        .filter(|key| !resuming_keys.contains(key.as_str()))
        .map(|key| WorkItem::new(key.clone()))
        .collect();
    fresh.sort_by(|a, b| a.source_key.cmp(&b.source_key));
    fresh.dedup_by(|a, b| a.source_key == b.source_key);

    debug!(
        resuming = resuming.len(),
        fresh = fresh.len(),
        "Built work queue"
    );

    resuming.extend(fresh);
    resuming
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use engine_core::state::models::CheckpointStatus;
    use model::work::item::WorkKind;

    fn partial(key: &str, processed: usize) -> ProgressCheckpoint {
        ProgressCheckpoint {
            source_key: key.into(),
            total_records: 10000,
            processed_records: processed,
            last_completed_chunk: processed / 2500,
            total_chunks: 4,
            status: CheckpointStatus::Processing,
            last_updated: Utc::now(),
        }
    }

    fn keys(items: &[WorkItem]) -> Vec<&str> {
        items.iter().map(|i| i.source_key.as_str()).collect()
    }

    #[test]
    fn resuming_items_come_before_new_ones() {
        let discovered = vec!["delta_c.csv".to_string(), "delta_a.csv".to_string()];
        let partials = vec![partial("delta_z.csv", 2500), partial("delta_m.csv", 5000)];
        let queue = build_queue(&discovered, &ProcessedHistory::default(), &partials);

        assert_eq!(
            keys(&queue),
            vec!["delta_m.csv", "delta_z.csv", "delta_a.csv", "delta_c.csv"]
        );
        assert_eq!(queue[0].kind, WorkKind::Resuming);
        assert_eq!(queue[0].resume_offset, 5000);
        assert_eq!(queue[2].kind, WorkKind::New);
    }

    #[test]
    fn history_keys_never_enter_the_queue() {
        let discovered = vec!["delta_a.csv".to_string(), "delta_b.csv".to_string()];
        let mut history = ProcessedHistory::default();
        history.insert("delta_a.csv");

        let queue = build_queue(&discovered, &history, &[]);
        assert_eq!(keys(&queue), vec!["delta_b.csv"]);
    }

    #[test]
    fn stale_partial_for_processed_file_is_dropped() {
        let mut history = ProcessedHistory::default();
        history.insert("delta_a.csv");

        let queue = build_queue(&[], &history, &[partial("delta_a.csv", 2500)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn discovered_key_with_partial_appears_once_as_resuming() {
        let discovered = vec!["delta_a.csv".to_string()];
        let queue = build_queue(
            &discovered,
            &ProcessedHistory::default(),
            &[partial("delta_a.csv", 2500)],
        );

        assert_eq!(queue.len(), 1);
        assert!(queue[0].is_resuming());
    }

    #[test]
    fn completed_checkpoints_are_not_resumed() {
        let mut done = partial("delta_a.csv", 10000);
        done.status = CheckpointStatus::Completed;

        let queue = build_queue(&[], &ProcessedHistory::default(), &[done]);
        assert!(queue.is_empty());
    }

    #[test]
    fn filter_requires_prefix_and_suffix() {
        let filter = DiscoveryFilter::from_settings(&SyncSettings::default());
        assert!(filter.matches("delta_20240101.csv"));
        assert!(!filter.matches("other_20240101.csv"));
        assert!(!filter.matches("delta_20240101.csv.bak"));
    }
}
