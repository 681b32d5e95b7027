//! Output ledger that doubles as the resume checkpoint.
//!
//! Layout: CSV with header `id,status,reason,<stage columns...>`. The set of
//! ids in the file is the [`CheckpointIndex`]; nothing else is persisted.
//!
//! Flushes never modify the ledger in place: the current file is copied to
//! `<ledger>.tmp`, new rows are appended, the copy is fsynced and renamed
//! over the original. A kill at any point leaves either the old or the new
//! complete file behind.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;

use crate::work::Fields;

pub const ID_COLUMN: &str = "id";
pub const STATUS_COLUMN: &str = "status";
pub const REASON_COLUMN: &str = "reason";

/// Outcome recorded for an attempted work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,
    Skipped(String),
    Failed(String),
}

impl Status {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Ok => "",
            Self::Skipped(r) | Self::Failed(r) => r,
        }
    }

    /// Parse the `status`/`reason` column pair
    pub fn parse(label: &str, reason: &str) -> Option<Self> {
        match label {
            "ok" => Some(Self::Ok),
            "skipped" => Some(Self::Skipped(reason.to_string())),
            "failed" => Some(Self::Failed(reason.to_string())),
            _ => None,
        }
    }
}

/// One ledger row, immutable once produced by the item processor.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRecord {
    pub id: String,
    pub fields: Fields,
    pub status: Status,
}

impl ProcessedRecord {
    pub fn ok(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
            status: Status::Ok,
        }
    }

    pub fn skipped(id: impl Into<String>, fields: Fields, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields,
            status: Status::Skipped(reason.into()),
        }
    }

    pub fn failed(id: impl Into<String>, fields: Fields, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields,
            status: Status::Failed(reason.into()),
        }
    }
}

/// Ids already present in the output ledger (O(1) lookup).
#[derive(Debug, Default, Clone)]
pub struct CheckpointIndex {
    ids: FxHashSet<String>,
}

impl CheckpointIndex {
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns false if the id was already present
    fn insert(&mut self, id: String) -> bool {
        self.ids.insert(id)
    }
}

/// Errors reading or writing the ledger.
#[derive(Debug)]
pub enum CheckpointError {
    Io {
        path: PathBuf,
        source: io::Error,
    },
    /// File exists but cannot be parsed as complete ledger rows
    Corrupt {
        path: PathBuf,
        line: Option<u64>,
        message: String,
    },
    /// Ledger was written by a different stage (column layout differs)
    SchemaMismatch {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },
    Duplicate {
        path: PathBuf,
        id: String,
    },
}

impl std::fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Corrupt {
                path,
                line: Some(line),
                message,
            } => write!(
                f,
                "{} is corrupt at line {line}: {message}. Inspect the file before resuming",
                path.display()
            ),
            Self::Corrupt {
                path,
                line: None,
                message,
            } => write!(
                f,
                "{} is corrupt: {message}. Inspect the file before resuming",
                path.display()
            ),
            Self::SchemaMismatch {
                path,
                expected,
                found,
            } => write!(
                f,
                "{} has columns [{}], expected [{}]. Is this the output of another stage?",
                path.display(),
                found.join(","),
                expected.join(",")
            ),
            Self::Duplicate { path, id } => {
                write!(f, "{}: duplicate id {id:?}", path.display())
            }
        }
    }
}

impl std::error::Error for CheckpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> CheckpointError + '_ {
    move |source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn csv_err(path: &Path, e: &csv::Error) -> CheckpointError {
    CheckpointError::Corrupt {
        path: path.to_path_buf(),
        line: e.position().map(csv::Position::line),
        message: e.to_string(),
    }
}

/// Parsed ledger contents: header plus the raw rows, validated.
struct LoadedLedger {
    header: Vec<String>,
    rows: Vec<csv::StringRecord>,
    index: CheckpointIndex,
}

/// Read and validate a ledger. Missing or empty file → `None`.
fn load(path: &Path) -> Result<Option<LoadedLedger>, CheckpointError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path)(e)),
    };
    if bytes.is_empty() {
        return Ok(None);
    }
    // Every flush ends on a record terminator; anything else is a torn write
    if !bytes.ends_with(b"\n") {
        return Err(CheckpointError::Corrupt {
            path: path.to_path_buf(),
            line: None,
            message: "last row is incomplete (no trailing newline)".to_string(),
        });
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes.as_slice());
    let header: Vec<String> = reader
        .headers()
        .map_err(|e| csv_err(path, &e))?
        .iter()
        .map(String::from)
        .collect();

    let col = |name: &str| header.iter().position(|h| h == name);
    let (Some(id_col), Some(status_col), Some(reason_col)) =
        (col(ID_COLUMN), col(STATUS_COLUMN), col(REASON_COLUMN))
    else {
        return Err(CheckpointError::Corrupt {
            path: path.to_path_buf(),
            line: Some(1),
            message: format!(
                "header must contain {ID_COLUMN}, {STATUS_COLUMN} and {REASON_COLUMN}"
            ),
        });
    };

    let mut index = CheckpointIndex::default();
    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| csv_err(path, &e))?;
        let line = record.position().map(csv::Position::line);
        let id = record.get(id_col).unwrap_or_default();
        if id.is_empty() {
            return Err(CheckpointError::Corrupt {
                path: path.to_path_buf(),
                line,
                message: "empty id".to_string(),
            });
        }
        let label = record.get(status_col).unwrap_or_default();
        let reason = record.get(reason_col).unwrap_or_default();
        if Status::parse(label, reason).is_none() {
            return Err(CheckpointError::Corrupt {
                path: path.to_path_buf(),
                line,
                message: format!("unknown status {label:?}"),
            });
        }
        if !index.insert(id.to_string()) {
            return Err(CheckpointError::Duplicate {
                path: path.to_path_buf(),
                id: id.to_string(),
            });
        }
        rows.push(record);
    }

    Ok(Some(LoadedLedger {
        header,
        rows,
        index,
    }))
}

/// Build the set of ids already completed in `path`.
///
/// A missing or empty file is an empty set. A file that cannot be parsed as
/// complete ledger rows is an error: the operator must look at it first.
pub fn load_completed(path: &Path) -> Result<CheckpointIndex, CheckpointError> {
    Ok(load(path)?.map(|l| l.index).unwrap_or_default())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Remove a stale `<ledger>.tmp` left by a run killed mid-flush
pub fn cleanup_tmp_files(ledger: &Path) -> Result<(), CheckpointError> {
    let tmp = tmp_path_for(ledger);
    if tmp.exists() {
        log::warn!("Removing stale tmp file: {}", tmp.display());
        fs::remove_file(&tmp).map_err(io_err(&tmp))?;
    }
    Ok(())
}

/// Append-only writer over one stage's ledger file.
pub struct CheckpointStore {
    path: PathBuf,
    tmp_path: PathBuf,
    header: Vec<String>,
    index: CheckpointIndex,
    pending: Vec<ProcessedRecord>,
    staged: FxHashSet<String>,
    rows_on_disk: usize,
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("path", &self.path)
            .field("rows_on_disk", &self.rows_on_disk)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl CheckpointStore {
    /// Open (or prepare to create) the ledger at `path` for a stage writing `columns`.
    ///
    /// Loads the checkpoint index from the existing file and rejects files
    /// written with a different column layout.
    pub fn open(path: &Path, columns: &[&str]) -> Result<Self, CheckpointError> {
        cleanup_tmp_files(path)?;

        let header: Vec<String> = [ID_COLUMN, STATUS_COLUMN, REASON_COLUMN]
            .iter()
            .chain(columns)
            .map(|s| s.to_string())
            .collect();

        let (index, rows_on_disk) = match load(path)? {
            Some(loaded) => {
                if loaded.header != header {
                    return Err(CheckpointError::SchemaMismatch {
                        path: path.to_path_buf(),
                        expected: header,
                        found: loaded.header,
                    });
                }
                (loaded.index, loaded.rows.len())
            }
            None => (CheckpointIndex::default(), 0),
        };

        if rows_on_disk > 0 {
            log::info!(
                "Resuming {}: {} items already processed",
                path.display(),
                rows_on_disk
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            tmp_path: tmp_path_for(path),
            header,
            index,
            pending: Vec::new(),
            staged: FxHashSet::default(),
            rows_on_disk,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ids already durable in the ledger
    pub fn index(&self) -> &CheckpointIndex {
        &self.index
    }

    pub fn rows_on_disk(&self) -> usize {
        self.rows_on_disk
    }

    /// Stage records for the next [`flush`](Self::flush).
    ///
    /// Rejects an id that is already in the ledger or already staged; the
    /// on-disk file is untouched until flush.
    pub fn append(
        &mut self,
        records: impl IntoIterator<Item = ProcessedRecord>,
    ) -> Result<(), CheckpointError> {
        for record in records {
            if self.index.contains(&record.id) || !self.staged.insert(record.id.clone()) {
                return Err(CheckpointError::Duplicate {
                    path: self.path.clone(),
                    id: record.id,
                });
            }
            self.pending.push(record);
        }
        Ok(())
    }

    /// Durably persist staged records. Returns the number of rows written.
    pub fn flush(&mut self) -> Result<usize, CheckpointError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let has_rows = self.rows_on_disk > 0;
        if has_rows {
            fs::copy(&self.path, &self.tmp_path).map_err(io_err(&self.tmp_path))?;
        } else {
            File::create(&self.tmp_path).map_err(io_err(&self.tmp_path))?;
        }

        let file = OpenOptions::new()
            .append(true)
            .open(&self.tmp_path)
            .map_err(io_err(&self.tmp_path))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        let tmp = self.tmp_path.clone();
        let write_err = |e: csv::Error| CheckpointError::Io {
            path: tmp.clone(),
            source: io::Error::other(e),
        };
        if !has_rows {
            writer.write_record(&self.header).map_err(write_err)?;
        }
        for record in &self.pending {
            writer
                .write_record(row_values(&self.header, record))
                .map_err(write_err)?;
        }
        writer.flush().map_err(io_err(&self.tmp_path))?;
        let file = writer
            .into_inner()
            .map_err(|e| io_err(&self.tmp_path)(e.into_error()))?;
        file.sync_all().map_err(io_err(&self.tmp_path))?;
        drop(file);

        fs::rename(&self.tmp_path, &self.path).map_err(io_err(&self.path))?;

        let written = self.pending.len();
        self.staged.clear();
        for record in self.pending.drain(..) {
            self.index.insert(record.id);
        }
        self.rows_on_disk += written;
        log::debug!(
            "{}: flushed {written} rows ({} total)",
            self.path.display(),
            self.rows_on_disk
        );
        Ok(written)
    }
}

/// Cell values in header order; stage columns missing from `fields` are empty.
fn row_values<'a>(header: &'a [String], record: &'a ProcessedRecord) -> Vec<&'a str> {
    header
        .iter()
        .map(|col| match col.as_str() {
            ID_COLUMN => record.id.as_str(),
            STATUS_COLUMN => record.status.label(),
            REASON_COLUMN => record.status.reason(),
            other => record.fields.get(other).map_or("", String::as_str),
        })
        .collect()
}

/// Rewrite the ledger without rows whose status is `label`.
///
/// This is the manual re-processing path: pruned ids are attempted again
/// on the next run. Returns the number of rows removed.
pub fn prune_status(path: &Path, label: &str) -> Result<usize, CheckpointError> {
    let Some(loaded) = load(path)? else {
        return Ok(0);
    };
    let status_col = loaded
        .header
        .iter()
        .position(|h| h == STATUS_COLUMN)
        .unwrap_or_default();

    let before = loaded.rows.len();
    let kept: Vec<&csv::StringRecord> = loaded
        .rows
        .iter()
        .filter(|r| r.get(status_col) != Some(label))
        .collect();
    let removed = before - kept.len();
    if removed == 0 {
        return Ok(0);
    }

    let tmp = tmp_path_for(path);
    let file = File::create(&tmp).map_err(io_err(&tmp))?;
    let mut writer = csv::Writer::from_writer(file);
    let write_err = |e: csv::Error| CheckpointError::Io {
        path: tmp.clone(),
        source: io::Error::other(e),
    };
    writer.write_record(&loaded.header).map_err(write_err)?;
    for row in kept {
        writer.write_record(row).map_err(write_err)?;
    }
    let mut file = writer
        .into_inner()
        .map_err(|e| io_err(&tmp)(e.into_error()))?;
    file.flush().map_err(io_err(&tmp))?;
    file.sync_all().map_err(io_err(&tmp))?;
    drop(file);
    fs::rename(&tmp, path).map_err(io_err(path))?;

    log::info!("{}: removed {removed} {label} rows", path.display());
    Ok(removed)
}
