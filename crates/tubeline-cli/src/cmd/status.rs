//! Status subcommand: what a ledger holds, and why items failed

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use tubeline_core::{
    ID_COLUMN, Ledger, REASON_COLUMN, STATUS_COLUMN, SharedProgress, fmt_num, load_completed,
    read_ledger,
};

/// Failed rows listed individually before the rest are only counted
const MAX_LISTED: usize = 20;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Ledger written by any stage
    pub ledger: PathBuf,
}

#[derive(Debug, Default, PartialEq)]
pub struct Tally {
    pub ok: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Skip reasons with their counts
    pub skip_reasons: BTreeMap<String, usize>,
    /// `(id, reason)` of every failed row, in file order
    pub failures: Vec<(String, String)>,
}

pub fn tally(ledger: &Ledger) -> Tally {
    let mut t = Tally::default();
    let field = |row: &tubeline_core::Fields, col: &str| row.get(col).cloned().unwrap_or_default();
    for row in &ledger.rows {
        match row.get(STATUS_COLUMN).map(String::as_str) {
            Some("ok") => t.ok += 1,
            Some("skipped") => {
                t.skipped += 1;
                *t.skip_reasons.entry(field(row, REASON_COLUMN)).or_default() += 1;
            }
            Some("failed") => {
                t.failed += 1;
                t.failures.push((field(row, ID_COLUMN), field(row, REASON_COLUMN)));
            }
            _ => {}
        }
    }
    t
}

pub fn run(args: StatusArgs, progress: &SharedProgress) -> Result<()> {
    anyhow::ensure!(args.ledger.exists(), "{} does not exist", args.ledger.display());
    // validates the whole file the same way a resuming run would
    let index = load_completed(&args.ledger)
        .with_context(|| format!("Cannot check {}", args.ledger.display()))?;
    let t = tally(&read_ledger(&args.ledger)?);

    if !progress.is_tty() {
        println!(
            "{}: rows={} ok={} skipped={} failed={}",
            args.ledger.display(),
            index.len(),
            t.ok,
            t.skipped,
            t.failed
        );
        for (reason, n) in &t.skip_reasons {
            println!("skipped\t{n}\t{reason}");
        }
        for (id, reason) in &t.failures {
            println!("failed\t{id}\t{reason}");
        }
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(args.ledger.display()).fg(Color::Cyan),
            Cell::new("Rows").fg(Color::Cyan),
        ]);
    table.add_row(vec![Cell::new("ok").fg(Color::Green), Cell::new(fmt_num(t.ok))]);
    table.add_row(vec![Cell::new("skipped"), Cell::new(fmt_num(t.skipped))]);
    for (reason, n) in &t.skip_reasons {
        table.add_row(vec![Cell::new(format!("  {reason}")), Cell::new(fmt_num(*n))]);
    }
    table.add_row(vec![Cell::new("failed").fg(Color::Yellow), Cell::new(fmt_num(t.failed))]);
    eprintln!("\n{table}");

    if !t.failures.is_empty() {
        let mut failures = Table::new();
        failures
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Failed id").fg(Color::Cyan),
                Cell::new("Reason").fg(Color::Cyan),
            ]);
        for (id, reason) in t.failures.iter().take(MAX_LISTED) {
            failures.add_row(vec![Cell::new(id), Cell::new(reason)]);
        }
        eprintln!("{failures}");
        if t.failures.len() > MAX_LISTED {
            eprintln!("... and {} more", t.failures.len() - MAX_LISTED);
        }
        eprintln!("Run `tubeline prune-failed {}` to retry them.", args.ledger.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_reasons() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("transcripts_x.csv");
        std::fs::write(
            &path,
            "id,status,reason,transcript\n\
             v1,ok,,hi\n\
             v2,skipped,no captions,\n\
             v3,failed,HTTP 503 (after 3 attempts),\n\
             v4,skipped,no captions,\n",
        )
        .unwrap();
        let t = tally(&read_ledger(&path).unwrap());
        assert_eq!((t.ok, t.skipped, t.failed), (1, 2, 1));
        assert_eq!(t.skip_reasons["no captions"], 2);
        assert_eq!(t.failures, [("v3".to_string(), "HTTP 503 (after 3 attempts)".to_string())]);
    }
}
