//! Live checks against youtube.com.
//!
//! These tests require network access and are marked #[ignore] by default.
//! Run with: cargo test -p tubeline-youtube --test live -- --ignored

use std::sync::Arc;

use tempfile::TempDir;
use tubeline_core::{
    BatchRunner, CheckpointStore, ItemProcessor, ProgressContext, RateLimiter, RunOptions,
    RunState, WorkItem, read_ledger,
};
use tubeline_youtube::{TranscriptsProcessor, YoutubeApi, search_videos};

/// Fetch the transcript of a long-lived public video
#[test]
#[ignore]
fn fetch_transcript() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let output = temp_dir.path().join("transcripts_live.csv");

    let mut processor = TranscriptsProcessor::new(vec!["en".to_string()]);
    let store = CheckpointStore::open(&output, processor.columns()).expect("open ledger");
    let summary = BatchRunner::new(
        "transcripts",
        store,
        RateLimiter::per_minute(30),
        RunOptions::default(),
        Arc::new(ProgressContext::hidden()),
    )
    .run(&vec![WorkItem::new("jNQXAC9IVRw", ())], &mut processor)
    .expect("run");

    assert_eq!(summary.state, RunState::Done);
    assert_eq!(summary.failed, 0, "transcript fetch failed");

    let ledger = read_ledger(&output).expect("read ledger");
    assert_eq!(ledger.rows.len(), 1);
    println!("status: {}", ledger.rows[0]["status"]);
}

/// Search with a real key taken from YOUTUBE_API_KEY
#[test]
#[ignore]
fn search_returns_videos() {
    let key = std::env::var("YOUTUBE_API_KEY").expect("YOUTUBE_API_KEY not set");
    let api = YoutubeApi::new(key);
    let mut lane = RateLimiter::per_minute(50);

    let videos = search_videos(&api, &mut lane, "NYC congestion pricing", 3).expect("search");
    assert!(!videos.is_empty());
    assert!(videos.len() <= 3);
}
