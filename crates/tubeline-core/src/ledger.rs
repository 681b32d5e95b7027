//! Reading finished ledgers as input for later stages

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Context;

use crate::checkpoint::STATUS_COLUMN;
use crate::work::Fields;

/// A CSV dataset loaded as header-keyed rows.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    pub headers: Vec<String>,
    pub rows: Vec<Fields>,
}

impl Ledger {
    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h == name)
    }

    /// Rows usable as input downstream: `status == ok`, or every row when the
    /// file has no status column (hand-made input).
    pub fn completed_rows(&self) -> impl Iterator<Item = &Fields> {
        let filtered = self.has_column(STATUS_COLUMN);
        self.rows.iter().filter(move |row| {
            !filtered || row.get(STATUS_COLUMN).is_some_and(|s| s == "ok")
        })
    }
}

/// Load any CSV dataset. Rows of unequal length are an error.
pub fn read_ledger(path: &Path) -> anyhow::Result<Ledger> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Cannot open {}", path.display()))?;
    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Cannot read header of {}", path.display()))?
        .iter()
        .map(String::from)
        .collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.with_context(|| format!("Malformed row in {}", path.display()))?;
        let row: Fields = headers
            .iter()
            .cloned()
            .zip(record.iter().map(String::from))
            .collect();
        rows.push(row);
    }
    log::debug!("{}: {} rows", path.display(), rows.len());
    Ok(Ledger { headers, rows })
}

/// Most recently modified `<prefix>_*.csv` in `dir`.
pub fn latest_matching(dir: &Path, prefix: &str) -> Option<PathBuf> {
    let pattern = dir.join(format!("{prefix}_*.csv"));
    let entries = glob::glob(&pattern.to_string_lossy()).ok()?;
    entries
        .filter_map(Result::ok)
        .filter_map(|path| {
            let modified = path.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, path))
        })
        .max_by_key(|(modified, _): &(SystemTime, PathBuf)| *modified)
        .map(|(_, path)| path)
}

/// Fresh output path `<dir>/<prefix>_YYYYMMDD_HHMMSS.csv` that does not exist yet.
///
/// Two runs started in the same second get `_2`, `_3`, ... appended; opening an
/// existing file would silently resume it.
pub fn default_output(dir: &Path, prefix: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("{prefix}_{stamp}.csv"));
    if !path.exists() {
        return path;
    }
    (2u32..)
        .map(|n| dir.join(format!("{prefix}_{stamp}_{n}.csv")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(path)
}

/// Explicit `--input`, or the newest ledger of the producing stage.
pub fn resolve_input(explicit: Option<&Path>, dir: &Path, prefix: &str) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        anyhow::ensure!(path.exists(), "Input file not found: {}", path.display());
        return Ok(path.to_path_buf());
    }
    let found = latest_matching(dir, prefix).with_context(|| {
        format!(
            "No {prefix}_*.csv found in {}; pass --input or run the {prefix} stage first",
            dir.display()
        )
    })?;
    log::info!("Using input {}", found.display());
    Ok(found)
}
