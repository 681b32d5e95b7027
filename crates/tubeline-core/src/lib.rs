//! Tubeline Core - resumable, rate-limited batch engine
//!
//! Every research stage (scrape, transcripts, summarize, label, profiles,
//! demographics) is a Work Source plus an Item Processor driven by the
//! shared [`BatchRunner`]. The output ledger doubles as the checkpoint, so
//! re-running a stage against the same output file only attempts new work.

pub mod checkpoint;
pub mod error;
pub mod http;
pub mod ledger;
pub mod logging;
pub mod processor;
pub mod progress;
pub mod queue;
pub mod rate_limit;
pub mod retry;
pub mod runner;
pub mod summary;
#[cfg(feature = "test-support")]
pub mod testing;
pub mod work;

// Re-exports for convenience
pub use checkpoint::{
    CheckpointError, CheckpointIndex, CheckpointStore, ID_COLUMN, ProcessedRecord, REASON_COLUMN,
    STATUS_COLUMN, Status, cleanup_tmp_files, load_completed, prune_status,
};
pub use error::{Fatal, ItemError};
pub use http::{ApiError, SHARED_RUNTIME, get_text, http_client, post_json};
pub use ledger::{Ledger, default_output, latest_matching, read_ledger, resolve_input};
pub use logging::{IndicatifLogger, init_logging};
pub use processor::{ItemProcessor, process_item};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use queue::WorkQueue;
pub use rate_limit::{Clock, ManualClock, RateLimiter, SharedClock, SystemClock, interval_for};
pub use retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, RetryPolicy};
pub use runner::{BatchRunner, DEFAULT_FLUSH_EVERY, RunOptions, RunState};
pub use summary::RunSummary;
pub use work::{Fields, WorkItem, WorkSource};
