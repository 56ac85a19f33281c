use engine_core::state::models::ProgressCheckpoint;
use engine_runtime::{invocation::RunSummary, status::RunStatus};

/// Console rendering for the end of an invocation: the per-file blocks,
/// then the run summary line, then the terminal status.
pub fn print_summary(summary: &RunSummary) {
    for file in &summary.report.files {
        println!("{}", file.render());
    }
    print!("{}", summary.report.render_summary());
    println!("status: {}", summary.status);
}

/// Exit codes for the scheduler wrapping this binary. Partial progress and
/// an empty queue are both normal outcomes.
pub fn exit_code(status: &RunStatus) -> i32 {
    match status {
        RunStatus::NoNewWork
        | RunStatus::Completed { .. }
        | RunStatus::Partial { .. }
        | RunStatus::InsufficientTimeRetry => 0,
        RunStatus::ProcessingError { .. } => 1,
        RunStatus::ConnectivityError => 2,
        RunStatus::ConcurrentRun => 3,
    }
}

pub fn print_progress_table(checkpoint: &ProgressCheckpoint) {
    println!("Progress for '{}':", checkpoint.source_key);
    println!("-----------------------------");
    println!("{:<18} {:?}", "Status", checkpoint.status);
    println!(
        "{:<18} {}/{}",
        "Records", checkpoint.processed_records, checkpoint.total_records
    );
    println!(
        "{:<18} {}/{}",
        "Chunks", checkpoint.last_completed_chunk, checkpoint.total_chunks
    );
    println!("{:<18} {:.1}%", "Progress", checkpoint.progress_fraction() * 100.0);
    println!("{:<18} {}", "Last updated", checkpoint.last_updated.to_rfc3339());
}
