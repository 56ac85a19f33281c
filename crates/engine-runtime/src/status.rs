use std::fmt;
use std::time::Duration;

/// Terminal status of one invocation, for the entry-point wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Discovery found nothing to do.
    NoNewWork,
    /// All queued work finished; `file` is the last file completed.
    Completed { file: String, elapsed: Duration },
    /// Budget ran out mid-file; a checkpoint marks the resume point.
    Partial {
        file: String,
        chunks_done: usize,
        chunks_total: usize,
    },
    /// Work was queued but the budget could not fit any of it.
    InsufficientTimeRetry,
    /// A store was unreachable at startup; no work was attempted.
    ConnectivityError,
    /// Another invocation holds a live lease on the state bucket.
    ConcurrentRun,
    /// A file failed with a hard error (and was skipped).
    ProcessingError { file: String, message: String },
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::NoNewWork => write!(f, "no new files to process"),
            RunStatus::Completed { file, elapsed } => {
                write!(f, "completed through {file} in {:.1}s", elapsed.as_secs_f64())
            }
            RunStatus::Partial {
                file,
                chunks_done,
                chunks_total,
            } => write!(f, "partial: {file} at {chunks_done}/{chunks_total} chunks"),
            RunStatus::InsufficientTimeRetry => {
                write!(f, "insufficient time to start work; retry next invocation")
            }
            RunStatus::ConnectivityError => write!(f, "store connectivity check failed"),
            RunStatus::ConcurrentRun => write!(f, "another invocation holds the lease"),
            RunStatus::ProcessingError { file, message } => {
                write!(f, "error processing {file}: {message}")
            }
        }
    }
}
