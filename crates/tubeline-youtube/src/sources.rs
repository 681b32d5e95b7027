//! Work sources derived from earlier stage ledgers.
//!
//! Sources only read files; they never call a rate-limited service.

use std::path::{Path, PathBuf};

use anyhow::Context;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tubeline_core::{Fields, ID_COLUMN, Ledger, WorkItem, WorkSource, read_ledger};

use crate::scrape::COMMENTS_COLUMN;

/// One top-level comment as embedded in the scrape ledger's `comments_json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Provider comment id; empty when the source did not supply one
    #[serde(default)]
    pub comment_id: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub author_channel_id: String,
    #[serde(default)]
    pub comment_text: String,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub published_at: String,
}

/// Stable id for a comment: the provider id, or a short content hash.
pub fn comment_key(video_id: &str, comment: &Comment) -> String {
    if !comment.comment_id.is_empty() {
        return comment.comment_id.clone();
    }
    let mut hasher = blake3::Hasher::new();
    for part in [
        video_id,
        comment.author_channel_id.as_str(),
        comment.published_at.as_str(),
        comment.comment_text.as_str(),
    ] {
        hasher.update(part.as_bytes());
        // separator keeps ("ab","c") and ("a","bc") apart
        hasher.update(&[0x1f]);
    }
    let hex = hasher.finalize().to_hex();
    format!("c_{}", &hex.as_str()[..16])
}

/// Video id of a row: `id` in a ledger, `video_id` in hand-made input.
fn video_id_of(row: &Fields) -> Option<&str> {
    row.get("video_id")
        .or_else(|| row.get(ID_COLUMN))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

fn load(path: &Path) -> anyhow::Result<Ledger> {
    read_ledger(path).with_context(|| format!("Cannot load input {}", path.display()))
}

// === Videos ===

/// Distinct video ids from a scrape (or any video-keyed) ledger, in file order.
#[derive(Debug, Clone)]
pub struct VideoSource {
    path: PathBuf,
}

impl VideoSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl WorkSource for VideoSource {
    type Payload = ();

    fn enumerate(&self) -> anyhow::Result<Vec<WorkItem<()>>> {
        let ledger = load(&self.path)?;
        anyhow::ensure!(
            ledger.has_column("video_id") || ledger.has_column(ID_COLUMN),
            "{} has no video_id or id column",
            self.path.display()
        );
        let mut seen = FxHashSet::default();
        Ok(ledger
            .completed_rows()
            .filter_map(video_id_of)
            .filter(|id| seen.insert(id.to_string()))
            .map(|id| WorkItem::new(id, ()))
            .collect())
    }
}

// === Comments ===

/// A comment queued for labeling, with the video it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentItem {
    pub video_id: String,
    pub video_title: String,
    pub comment: Comment,
}

/// Every comment in the scrape ledger, expanded from `comments_json`.
#[derive(Debug, Clone)]
pub struct CommentSource {
    path: PathBuf,
}

impl CommentSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl WorkSource for CommentSource {
    type Payload = CommentItem;

    fn enumerate(&self) -> anyhow::Result<Vec<WorkItem<CommentItem>>> {
        expand_comments(&load(&self.path)?, &self.path)
    }
}

/// Comments from a scrape ledger (one row per video with `comments_json`)
/// or from a flat per-comment CSV with `video_id` and `comment_text` columns.
fn expand_comments(ledger: &Ledger, path: &Path) -> anyhow::Result<Vec<WorkItem<CommentItem>>> {
    let mut items = Vec::new();
    if ledger.has_column(COMMENTS_COLUMN) {
        for row in ledger.completed_rows() {
            let Some(video_id) = video_id_of(row) else {
                continue;
            };
            let raw = row.get(COMMENTS_COLUMN).map_or("", String::as_str);
            if raw.trim().is_empty() {
                continue;
            }
            let comments: Vec<Comment> = serde_json::from_str(raw).with_context(|| {
                format!("{}: invalid {COMMENTS_COLUMN} for video {video_id}", path.display())
            })?;
            let title = row.get("title").cloned().unwrap_or_default();
            for comment in comments {
                items.push(WorkItem::new(
                    comment_key(video_id, &comment),
                    CommentItem {
                        video_id: video_id.to_string(),
                        video_title: title.clone(),
                        comment,
                    },
                ));
            }
        }
    } else {
        anyhow::ensure!(
            ledger.has_column("comment_text"),
            "{} has neither {COMMENTS_COLUMN} nor comment_text columns",
            path.display()
        );
        let text = |row: &Fields, col: &str| row.get(col).cloned().unwrap_or_default();
        for row in ledger.completed_rows() {
            let Some(video_id) = row.get("video_id").filter(|v| !v.is_empty()) else {
                continue;
            };
            let comment = Comment {
                comment_id: text(row, "comment_id"),
                author: text(row, "author"),
                author_channel_id: text(row, "author_channel_id"),
                comment_text: text(row, "comment_text"),
                like_count: text(row, "like_count").parse().unwrap_or_default(),
                published_at: text(row, "published_at"),
            };
            items.push(WorkItem::new(
                comment_key(video_id, &comment),
                CommentItem {
                    video_id: video_id.clone(),
                    video_title: text(row, "video_title"),
                    comment,
                },
            ));
        }
    }
    Ok(items)
}

// === Channels ===

/// A commenter's channel queued for profile lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Commenter {
    /// Display name seen on the first comment by this channel
    pub author: String,
}

/// Distinct non-blank `author_channel_id` values across all comments.
#[derive(Debug, Clone)]
pub struct ChannelSource {
    path: PathBuf,
}

impl ChannelSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl WorkSource for ChannelSource {
    type Payload = Commenter;

    fn enumerate(&self) -> anyhow::Result<Vec<WorkItem<Commenter>>> {
        let comments = expand_comments(&load(&self.path)?, &self.path)?;
        let mut seen = FxHashSet::default();
        Ok(comments
            .into_iter()
            .filter_map(|item| {
                let c = item.payload.comment;
                let id = c.author_channel_id.trim().to_string();
                (!id.is_empty() && seen.insert(id.clone()))
                    .then(|| WorkItem::new(id, Commenter { author: c.author }))
            })
            .collect())
    }
}
