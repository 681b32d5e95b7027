//! Batch runner: drives one stage from work source to ledger.
//!
//! ```text
//! RUNNING ──threshold──▶ FLUSHING ──▶ RUNNING
//!    │                                   │
//!    ├──fatal──▶ FLUSHING ──▶ ABORTED    │
//!    └──source exhausted──▶ FLUSHING ──▶ DONE
//! ```

use std::time::Instant;

use anyhow::Context;

use crate::checkpoint::{CheckpointStore, ProcessedRecord, Status};
use crate::processor::{ItemProcessor, process_item};
use crate::progress::SharedProgress;
use crate::queue::WorkQueue;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::summary::RunSummary;
use crate::work::WorkSource;

/// Default number of processed items buffered between flushes
pub const DEFAULT_FLUSH_EVERY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Flushing,
    Done,
    Aborted,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "RUNNING",
            Self::Flushing => "FLUSHING",
            Self::Done => "DONE",
            Self::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Processed items held in memory before a flush (at least 1)
    pub flush_every: usize,
    /// Cap on new items attempted this run
    pub limit: Option<usize>,
    pub retry: RetryPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            flush_every: DEFAULT_FLUSH_EVERY,
            limit: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Owns the ledger and the lane for the duration of one run.
pub struct BatchRunner {
    stage: String,
    store: CheckpointStore,
    lane: RateLimiter,
    options: RunOptions,
    progress: SharedProgress,
    state: RunState,
    buffer: Vec<ProcessedRecord>,
}

impl BatchRunner {
    pub fn new(
        stage: impl Into<String>,
        store: CheckpointStore,
        lane: RateLimiter,
        options: RunOptions,
        progress: SharedProgress,
    ) -> Self {
        let flush_every = options.flush_every.max(1);
        Self {
            stage: stage.into(),
            store,
            lane,
            options: RunOptions {
                flush_every,
                ..options
            },
            progress,
            state: RunState::Running,
            buffer: Vec::with_capacity(flush_every),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Process every source item not yet in the ledger.
    ///
    /// A fatal item error ends the run in `Aborted` after flushing what was
    /// buffered; it is reported through the summary, not as `Err`. `Err` is
    /// reserved for failures before processing starts (bad input) and for
    /// ledger I/O failures.
    pub fn run<S, P>(mut self, source: &S, processor: &mut P) -> anyhow::Result<RunSummary>
    where
        S: WorkSource,
        P: ItemProcessor<Payload = S::Payload>,
    {
        let started = Instant::now();
        let mut summary = RunSummary::new(&self.stage, self.store.path());

        let items = source
            .enumerate()
            .with_context(|| format!("{}: cannot enumerate work items", self.stage))?;
        let queue = WorkQueue::pending(items, self.store.index(), self.options.limit);
        summary.already_done = queue.already_done();

        log::info!(
            "{}: {} to process, {} already done",
            self.stage,
            queue.total(),
            queue.already_done()
        );
        if queue.duplicates() > 0 {
            log::info!("{}: {} repeated ids dropped", self.stage, queue.duplicates());
        }
        let pending = queue.total();
        let bar = self.progress.stage_bar(&self.stage, pending);

        for item in queue {
            bar.set_message(item.id.clone());
            match process_item(processor, &item, &mut self.lane, &self.options.retry) {
                Ok(record) => {
                    summary.attempted += 1;
                    match record.status {
                        Status::Ok => summary.ok += 1,
                        Status::Skipped(_) => summary.skipped += 1,
                        Status::Failed(_) => summary.failed += 1,
                    }
                    self.buffer.push(record);
                    bar.inc(1);
                    if self.buffer.len() >= self.options.flush_every {
                        self.flush(&mut summary, pending)?;
                    }
                }
                Err(fatal) => {
                    log::error!("{}: {fatal}", self.stage);
                    self.flush(&mut summary, pending).with_context(|| {
                        format!("{}: aborting on fatal error: {fatal}", self.stage)
                    })?;
                    self.transition(RunState::Aborted);
                    summary.abort_reason = Some(fatal.to_string());
                    break;
                }
            }
        }

        if self.state == RunState::Running {
            self.flush(&mut summary, pending)?;
            self.transition(RunState::Done);
        }
        bar.finish_and_clear();

        summary.state = self.state;
        summary.throttled = self.lane.total_waited();
        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    /// RUNNING → FLUSHING → RUNNING. An empty buffer writes nothing.
    ///
    /// Off a terminal the bar is hidden, so each write is reported as a log line.
    fn flush(&mut self, summary: &mut RunSummary, pending: usize) -> anyhow::Result<()> {
        self.transition(RunState::Flushing);
        self.store
            .append(self.buffer.drain(..))
            .with_context(|| format!("{}: cannot stage records", self.stage))?;
        let written = self
            .store
            .flush()
            .with_context(|| format!("{}: flush failed", self.stage))?;
        if written > 0 {
            summary.flushes += 1;
            if !self.progress.is_tty() {
                log::info!("{}", summary.progress_line(pending));
            }
        }
        self.transition(RunState::Running);
        Ok(())
    }

    fn transition(&mut self, to: RunState) {
        log::debug!("{}: {} -> {to}", self.stage, self.state);
        self.state = to;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::error::ItemError;
    use crate::progress::ProgressContext;
    use crate::rate_limit::ManualClock;
    use crate::work::{Fields, WorkItem};

    struct Echo;

    impl ItemProcessor for Echo {
        type Payload = ();

        fn columns(&self) -> &'static [&'static str] {
            &[]
        }

        fn call(&mut self, item: &WorkItem<()>, _: &mut RateLimiter) -> Result<Fields, ItemError> {
            if item.id == "boom" {
                Err(ItemError::Fatal("quotaExceeded".into()))
            } else {
                Ok(Fields::new())
            }
        }
    }

    fn runner(dir: &tempfile::TempDir, flush_every: usize) -> BatchRunner {
        let store = CheckpointStore::open(&dir.path().join("out.csv"), &[]).unwrap();
        let lane = RateLimiter::with_clock(Duration::ZERO, Arc::new(ManualClock::new()));
        BatchRunner::new(
            "test",
            store,
            lane,
            RunOptions {
                flush_every,
                ..RunOptions::default()
            },
            Arc::new(ProgressContext::hidden()),
        )
    }

    fn source(ids: &[&str]) -> Vec<WorkItem<()>> {
        ids.iter().map(|id| WorkItem::new(*id, ())).collect()
    }

    #[test]
    fn completes_in_done() {
        let dir = tempfile::TempDir::new().unwrap();
        let summary = runner(&dir, 2)
            .run(&source(&["a", "b", "c"]), &mut Echo)
            .unwrap();
        assert_eq!(summary.state, RunState::Done);
        assert_eq!(summary.ok, 3);
        assert_eq!(summary.flushes, 2);
    }

    #[test]
    fn fatal_aborts_after_flushing_buffer() {
        let dir = tempfile::TempDir::new().unwrap();
        let summary = runner(&dir, 10)
            .run(&source(&["a", "boom", "c"]), &mut Echo)
            .unwrap();
        assert_eq!(summary.state, RunState::Aborted);
        assert_eq!(summary.attempted, 1);
        assert!(summary.abort_reason.unwrap().contains("quotaExceeded"));

        let done = crate::checkpoint::load_completed(&dir.path().join("out.csv")).unwrap();
        assert!(done.contains("a"));
        assert!(!done.contains("boom"));
        assert!(!done.contains("c"));
    }

    #[test]
    fn failed_abort_flush_keeps_fatal_reason() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("ledgers/out.csv");
        let store = CheckpointStore::open(&out, &[]).unwrap();
        // a file where the ledger directory should go makes every write fail
        std::fs::write(dir.path().join("ledgers"), "").unwrap();
        let lane = RateLimiter::with_clock(Duration::ZERO, Arc::new(ManualClock::new()));
        let runner = BatchRunner::new(
            "test",
            store,
            lane,
            RunOptions::default(),
            Arc::new(ProgressContext::hidden()),
        );

        let err = runner.run(&source(&["a", "boom"]), &mut Echo).unwrap_err();
        let chain = format!("{err:#}");
        assert!(chain.contains("aborting on fatal error"), "{chain}");
        assert!(chain.contains("quotaExceeded"), "{chain}");
    }

    #[test]
    fn zero_flush_threshold_treated_as_one() {
        let dir = tempfile::TempDir::new().unwrap();
        let summary = runner(&dir, 0).run(&source(&["a", "b"]), &mut Echo).unwrap();
        assert_eq!(summary.flushes, 2);
    }

    #[test]
    fn empty_source_is_done_without_writing() {
        let dir = tempfile::TempDir::new().unwrap();
        let summary = runner(&dir, 2).run(&source(&[]), &mut Echo).unwrap();
        assert_eq!(summary.state, RunState::Done);
        assert_eq!(summary.flushes, 0);
        assert!(!dir.path().join("out.csv").exists());
    }
}
