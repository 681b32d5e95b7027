//! Prune-failed subcommand: drop failed rows so the next run re-attempts them

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tubeline_core::prune_status;

#[derive(Args, Debug)]
pub struct PruneArgs {
    /// Ledger to rewrite in place
    pub ledger: PathBuf,
}

pub fn run(args: PruneArgs) -> Result<()> {
    anyhow::ensure!(args.ledger.exists(), "{} does not exist", args.ledger.display());
    let removed = prune_status(&args.ledger, "failed")
        .with_context(|| format!("Cannot prune {}", args.ledger.display()))?;
    if removed == 0 {
        eprintln!("{}: no failed rows", args.ledger.display());
    } else {
        eprintln!(
            "{}: removed {removed} failed rows; re-run the stage with --output {} to retry them",
            args.ledger.display(),
            args.ledger.display()
        );
    }
    Ok(())
}
