use std::time::{Duration, Instant};
use tracing::debug;

/// Phases of one invocation, in the order the orchestrator runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Discovery,
    Resolution,
    Upload,
    Finalize,
}

/// Knobs for the budget controller. Every value is configuration, never a
/// literal in engine code.
#[derive(Debug, Clone)]
pub struct BudgetParams {
    /// Wall-clock budget for the whole invocation. Must be set below the
    /// platform's hard kill time.
    pub total: Duration,
    /// Tail reserved for final checkpoint writes. Sized to absorb at least
    /// one worst-case network call, since in-flight calls are never
    /// cancelled.
    pub safety_margin: Duration,
    /// Fraction of the total the resolution phase may consume.
    pub resolution_fraction: f64,
    /// Absolute ceiling on the resolution phase, so resolution never
    /// starves the upload phase on long budgets.
    pub resolution_cap: Duration,
    /// Empirical cost of pushing one record through the upload pipeline.
    pub per_record_cost: Duration,
    /// Shrinks affordability estimates to absorb estimation error.
    pub safety_factor: f64,
}

impl Default for BudgetParams {
    fn default() -> Self {
        BudgetParams {
            total: Duration::from_secs(540),
            safety_margin: Duration::from_secs(20),
            resolution_fraction: 0.6,
            resolution_cap: Duration::from_secs(120),
            per_record_cost: Duration::from_millis(8),
            safety_factor: 0.85,
        }
    }
}

/// Tracks elapsed wall-clock time against the invocation deadline and
/// decides when to stop starting new work.
///
/// The controller is advisory, not preemptive: it never cancels an
/// in-flight call. Callers must consult it between awaited calls — a wrong
/// cost estimate still runs over, which is what the safety margin is for.
#[derive(Debug, Clone)]
pub struct ExecutionBudget {
    started: Instant,
    params: BudgetParams,
}

impl ExecutionBudget {
    pub fn start(params: BudgetParams) -> Self {
        ExecutionBudget {
            started: Instant::now(),
            params,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.params.total.saturating_sub(self.elapsed())
    }

    /// True once only the reserved checkpoint-writing tail is left.
    pub fn in_final_margin(&self) -> bool {
        self.remaining() <= self.params.safety_margin
    }

    /// Whether to stop before starting the next piece of work in `phase`.
    /// Once the final margin is reached this is true for every phase.
    pub fn should_stop(&self, phase: Phase) -> bool {
        let stop = self.in_final_margin();
        if stop {
            debug!(?phase, remaining_ms = self.remaining().as_millis() as u64, "Budget exhausted");
        }
        stop
    }

    /// Ceiling for the contact-resolution phase:
    /// `min(resolution_fraction × total, resolution_cap)`.
    pub fn resolution_budget(&self) -> Duration {
        self.params
            .total
            .mul_f64(self.params.resolution_fraction)
            .min(self.params.resolution_cap)
    }

    /// Time still usable for uploads before the final margin.
    pub fn upload_budget_remaining(&self) -> Duration {
        self.remaining().saturating_sub(self.params.safety_margin)
    }

    /// How many records the remaining upload budget affords:
    /// `floor(remaining / per_record_cost × safety_factor)`.
    ///
    /// With no cost estimate configured there is no cap; the per-batch
    /// budget checks still apply.
    pub fn records_affordable(&self) -> usize {
        if self.params.per_record_cost.is_zero() {
            return usize::MAX;
        }
        let budget = self.upload_budget_remaining().as_secs_f64() * self.params.safety_factor;
        (budget / self.params.per_record_cost.as_secs_f64()) as usize
    }
}
