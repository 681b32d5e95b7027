//! End-of-run counts for one stage, printed as a table on a TTY or logged otherwise

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use comfy_table::{Attribute, Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use crate::progress::fmt_num;
use crate::runner::RunState;

/// What one batch run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stage: String,
    pub output: PathBuf,
    /// Terminal state: `Done` or `Aborted`
    pub state: RunState,
    /// Source items skipped because the ledger already had them
    pub already_done: usize,
    /// Items that reached a recorded outcome this run
    pub attempted: usize,
    pub ok: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Flushes that wrote at least one row
    pub flushes: usize,
    pub abort_reason: Option<String>,
    /// Time spent blocked on the rate limiter
    pub throttled: Duration,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn new(stage: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            stage: stage.into(),
            output: output.into(),
            state: RunState::Running,
            already_done: 0,
            attempted: 0,
            ok: 0,
            skipped: 0,
            failed: 0,
            flushes: 0,
            abort_reason: None,
            throttled: Duration::ZERO,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.state == RunState::Aborted
    }

    /// 0 for a completed run, 1 for an aborted one
    pub fn exit_code(&self) -> ExitCode {
        if self.is_aborted() {
            ExitCode::from(1)
        } else {
            ExitCode::SUCCESS
        }
    }

    /// `scrape: 120/500 processed (110 ok, 8 skipped, 2 failed)`
    pub fn progress_line(&self, pending: usize) -> String {
        format!(
            "{}: {}/{} processed ({} ok, {} skipped, {} failed)",
            self.stage,
            fmt_num(self.attempted),
            fmt_num(pending),
            fmt_num(self.ok),
            fmt_num(self.skipped),
            fmt_num(self.failed),
        )
    }

    /// Format summary table as a string.
    pub fn format_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new(&self.stage)
                    .fg(Color::Cyan)
                    .add_attribute(Attribute::Bold),
                Cell::new("Value").fg(Color::Cyan),
            ]);

        let state = match self.state {
            RunState::Aborted => Cell::new("ABORTED").fg(Color::Red),
            _ => Cell::new("DONE").fg(Color::Green),
        };
        table.add_row(vec![Cell::new("State"), state]);
        table.add_row(vec![
            Cell::new("Already done"),
            Cell::new(fmt_num(self.already_done)),
        ]);
        table.add_row(vec![
            Cell::new("Attempted"),
            Cell::new(fmt_num(self.attempted)),
        ]);
        table.add_row(vec![
            Cell::new("ok").fg(Color::Green),
            Cell::new(fmt_num(self.ok)),
        ]);
        table.add_row(vec![Cell::new("skipped"), Cell::new(fmt_num(self.skipped))]);
        let failed = Cell::new(fmt_num(self.failed));
        table.add_row(vec![
            Cell::new("failed"),
            if self.failed > 0 {
                failed.fg(Color::Yellow)
            } else {
                failed
            },
        ]);
        table.add_row(vec![Cell::new("Flushes"), Cell::new(self.flushes)]);
        table.add_row(vec![
            Cell::new("Rate-limit wait"),
            Cell::new(format!("{:.1}s", self.throttled.as_secs_f64())),
        ]);
        table.add_row(vec![
            Cell::new("Elapsed"),
            Cell::new(format!("{:.1}s", self.elapsed.as_secs_f64())),
        ]);
        table.add_row(vec![
            Cell::new("Output"),
            Cell::new(self.output.display().to_string()),
        ]);

        let mut out = format!("\n{table}");
        if let Some(reason) = &self.abort_reason {
            out.push_str(&format!("\nAborted: {reason}\nRe-run the same command to resume."));
        }
        out
    }

    /// Print summary table to stderr (TTY mode).
    pub fn print(&self) {
        eprintln!("{}", self.format_table());
    }

    /// Log minimal summary (non-TTY mode).
    pub fn log(&self) {
        let line = format!(
            "{}: ok={} skipped={} failed={} already_done={} flushes={} [{:.1}s] -> {}",
            self.stage,
            fmt_num(self.ok),
            fmt_num(self.skipped),
            fmt_num(self.failed),
            fmt_num(self.already_done),
            self.flushes,
            self.elapsed.as_secs_f64(),
            self.output.display()
        );
        match &self.abort_reason {
            Some(reason) => log::error!("{line} ABORTED: {reason}"),
            None => log::info!("{line}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_follows_state() {
        let mut s = RunSummary::new("scrape", "out.csv");
        s.state = RunState::Done;
        assert_eq!(s.exit_code(), ExitCode::SUCCESS);
        s.state = RunState::Aborted;
        assert_eq!(s.exit_code(), ExitCode::from(1));
    }

    #[test]
    fn table_mentions_abort_reason() {
        let mut s = RunSummary::new("summarize", "out.csv");
        s.state = RunState::Aborted;
        s.ok = 1_234;
        s.abort_reason = Some("insufficient_quota (while processing v7)".into());
        let table = s.format_table();
        assert!(table.contains("ABORTED"));
        assert!(table.contains("1,234"));
        assert!(table.contains("insufficient_quota"));
    }

    #[test]
    fn progress_line_counts_against_pending() {
        let mut s = RunSummary::new("label", "out.csv");
        s.attempted = 1_050;
        s.ok = 1_000;
        s.skipped = 45;
        s.failed = 5;
        assert_eq!(
            s.progress_line(2_000),
            "label: 1,050/2,000 processed (1,000 ok, 45 skipped, 5 failed)"
        );
    }
}
