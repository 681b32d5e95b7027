//! YouTube stages driven through the batch runner against a scripted server

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tubeline_core::testing::MockServer;
use tubeline_core::{
    BatchRunner, CheckpointStore, ItemProcessor, ManualClock, ProgressContext, RateLimiter,
    RetryPolicy, RunOptions, RunState, RunSummary, WorkItem, WorkSource, read_ledger,
};
use tubeline_youtube::{
    Comment, Commenter, ProfilesProcessor, ScrapeProcessor, TranscriptsProcessor, Video,
    YoutubeApi, search_videos,
};

fn lane(clock: &Arc<ManualClock>) -> RateLimiter {
    RateLimiter::with_clock(Duration::from_secs(1), clock.clone())
}

fn run<S, P>(dir: &TempDir, lane: RateLimiter, source: &S, processor: &mut P) -> RunSummary
where
    S: WorkSource,
    P: ItemProcessor<Payload = S::Payload>,
{
    let store = CheckpointStore::open(&dir.path().join("out.csv"), processor.columns()).unwrap();
    let options = RunOptions {
        flush_every: 1,
        limit: None,
        retry: RetryPolicy::new(2, Duration::from_millis(10)),
    };
    BatchRunner::new("test", store, lane, options, Arc::new(ProgressContext::hidden()))
        .run(source, processor)
        .unwrap()
}

fn comment_thread(id: &str, channel: &str, text: &str) -> serde_json::Value {
    json!({"snippet": {"topLevelComment": {"id": id, "snippet": {
        "authorDisplayName": format!("@{channel}"),
        "authorChannelId": {"value": channel},
        "textDisplay": text,
        "likeCount": 2,
        "publishedAt": "2024-03-01T12:00:00Z"
    }}}})
}

fn google_error(status: u16, reason: &str) -> (u16, String) {
    let body = json!({"error": {"code": status, "message": reason, "errors": [{"reason": reason}]}});
    (status, body.to_string())
}

#[test]
fn scrape_pages_comments_and_skips_disabled() {
    let search = json!({"items": [
        {"id": {"videoId": "vid1"}, "snippet": {"title": "First", "channelTitle": "Chan", "publishedAt": "2024-01-01T00:00:00Z"}},
        {"id": {"videoId": "vid2"}, "snippet": {"title": "Second", "channelTitle": "Chan", "publishedAt": "2024-01-02T00:00:00Z"}}
    ]});
    let page1 = json!({"nextPageToken": "p2", "items": [
        comment_thread("c1", "UCa", "one"), comment_thread("c2", "UCb", "two")
    ]});
    let page2 = json!({"items": [comment_thread("c3", "UCa", "three")]});

    let server = MockServer::start(vec![
        (200, search.to_string()),
        (200, page1.to_string()),
        (200, page2.to_string()),
        google_error(403, "commentsDisabled"),
    ]);
    let api = YoutubeApi::with_base_url(&server.base_url, "test-key");
    let clock = Arc::new(ManualClock::new());
    let mut lane = lane(&clock);

    let videos = search_videos(&api, &mut lane, "congestion pricing", 10).unwrap();
    assert_eq!(videos.len(), 2);

    let dir = TempDir::new().unwrap();
    let summary = run(&dir, lane, &videos, &mut ScrapeProcessor::new(api));
    assert_eq!(summary.state, RunState::Done);
    assert_eq!((summary.ok, summary.skipped), (1, 1));

    let requests = server.finish();
    assert!(requests[0].starts_with("/search?"));
    assert!(requests[0].contains("key=test-key"));
    assert!(requests[1].contains("videoId=vid1"));
    assert!(requests[1].contains("textFormat=plainText"));
    assert!(requests[2].contains("pageToken=p2"));
    // search, two comment pages, one more video: every request after the first waited
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(1); 3]);

    let rows = read_ledger(&dir.path().join("out.csv")).unwrap().rows;
    assert_eq!(rows[0]["id"], "vid1");
    assert_eq!(rows[0]["title"], "First");
    assert_eq!(rows[0]["comment_count"], "3");
    let comments: Vec<Comment> = serde_json::from_str(&rows[0]["comments_json"]).unwrap();
    assert_eq!(comments[2].comment_id, "c3");
    assert_eq!(comments[1].author_channel_id, "UCb");
    assert_eq!(rows[1]["status"], "skipped");
    assert_eq!(rows[1]["reason"], "commentsDisabled");
    assert_eq!(rows[1]["title"], "Second");
}

#[test]
fn scrape_quota_exhaustion_aborts() {
    let server = MockServer::start(vec![
        (200, json!({"items": [comment_thread("c1", "UCa", "hi")]}).to_string()),
        google_error(403, "quotaExceeded"),
    ]);
    let api = YoutubeApi::with_base_url(&server.base_url, "k");
    let clock = Arc::new(ManualClock::new());
    let videos = vec![
        WorkItem::new("v1", Video { title: "a".into(), channel: "c".into(), published_at: String::new() }),
        WorkItem::new("v2", Video { title: "b".into(), channel: "c".into(), published_at: String::new() }),
        WorkItem::new("v3", Video { title: "c".into(), channel: "c".into(), published_at: String::new() }),
    ];

    let dir = TempDir::new().unwrap();
    let summary = run(&dir, lane(&clock), &videos, &mut ScrapeProcessor::new(api));
    assert_eq!(summary.state, RunState::Aborted);
    assert!(summary.abort_reason.unwrap().contains("quota"));
    let rows = read_ledger(&dir.path().join("out.csv")).unwrap().rows;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], "v1");
}

#[test]
fn scrape_retries_rate_limited_page() {
    let server = MockServer::start(vec![
        google_error(403, "rateLimitExceeded"),
        (200, json!({"items": [comment_thread("c1", "UCa", "hi")]}).to_string()),
    ]);
    let api = YoutubeApi::with_base_url(&server.base_url, "k");
    let clock = Arc::new(ManualClock::new());
    let videos = vec![WorkItem::new(
        "v1",
        Video { title: "t".into(), channel: "c".into(), published_at: String::new() },
    )];

    let dir = TempDir::new().unwrap();
    let summary = run(&dir, lane(&clock), &videos, &mut ScrapeProcessor::new(api));
    assert_eq!(summary.ok, 1);
    assert_eq!(server.finish().len(), 2);
}

#[test]
fn profiles_found_and_unknown() {
    let channel = json!({"items": [{"id": "UCa", "snippet": {
        "title": "Alice", "description": "cooking", "country": "US", "customUrl": "@alice",
        "thumbnails": {"default": {"url": "https://img/d"}, "high": {"url": "https://img/h"}}
    }, "statistics": {"subscriberCount": "120", "viewCount": "5000", "videoCount": "7"}}]});
    let server = MockServer::start(vec![
        (200, channel.to_string()),
        (200, json!({"items": []}).to_string()),
    ]);
    let api = YoutubeApi::with_base_url(&server.base_url, "k");
    let clock = Arc::new(ManualClock::new());
    let source = vec![
        WorkItem::new("UCa", Commenter { author: "@alice".into() }),
        WorkItem::new("UCgone", Commenter { author: "@gone".into() }),
    ];

    let dir = TempDir::new().unwrap();
    let summary = run(&dir, lane(&clock), &source, &mut ProfilesProcessor::new(api));
    assert_eq!((summary.ok, summary.skipped), (1, 1));

    let requests = server.finish();
    assert!(requests[0].contains("part=snippet%2Cstatistics"));
    let rows = read_ledger(&dir.path().join("out.csv")).unwrap().rows;
    assert_eq!(rows[0]["channel_title"], "Alice");
    assert_eq!(rows[0]["thumbnail_url"], "https://img/h");
    assert_eq!(rows[0]["subscriber_count"], "120");
    assert_eq!(rows[1]["reason"], "channelNotFound");
}

#[test]
fn transcripts_fetch_selected_track() {
    let server = MockServer::start_with(|base| {
        let tracks = json!([
            {"baseUrl": format!("{base}/api/timedtext?v=v1&lang=en&kind=asr"), "name": {"simpleText": "English (auto-generated)"}, "languageCode": "en", "kind": "asr"},
            {"baseUrl": format!("{base}/api/timedtext?v=v1&lang=en"), "name": {"simpleText": "English"}, "languageCode": "en"}
        ]);
        let html = format!(
            r#"<html><script>var ytInitialPlayerResponse = {{"playabilityStatus":{{"status":"OK"}},"captions":{{"playerCaptionsTracklistRenderer":{{"captionTracks":{tracks}}}}}}};</script></html>"#
        );
        let timed = json!({"events": [
            {"segs": [{"utf8": "Welcome\u{a0}back"}]},
            {"segs": [{"utf8": "to the\nshow"}]}
        ]});
        vec![(200, html), (200, timed.to_string())]
    });
    let clock = Arc::new(ManualClock::new());
    let mut processor = TranscriptsProcessor::with_watch_base(&server.base_url, vec!["en".into()]);
    let source = vec![WorkItem::new("v1", ())];

    let dir = TempDir::new().unwrap();
    let summary = run(&dir, lane(&clock), &source, &mut processor);
    assert_eq!(summary.ok, 1);

    let requests = server.finish();
    assert!(requests[0].starts_with("/watch?v=v1"));
    assert!(requests[1].contains("lang=en&fmt=json3"));
    assert!(!requests[1].contains("kind=asr"));
    // the track download is a second paced request
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);

    let rows = read_ledger(&dir.path().join("out.csv")).unwrap().rows;
    assert_eq!(rows[0]["transcript"], "Welcome back to the show");
    assert_eq!(rows[0]["is_generated"], "false");
    assert_eq!(rows[0]["language"], "English");
    assert_eq!(rows[0]["segment_count"], "2");
}

#[test]
fn transcripts_without_captions_skipped() {
    let html = r#"{"playabilityStatus":{"status":"OK"}}"#.to_string();
    let server = MockServer::start(vec![(200, html)]);
    let clock = Arc::new(ManualClock::new());
    let mut processor = TranscriptsProcessor::with_watch_base(&server.base_url, vec!["en".into()]);

    let dir = TempDir::new().unwrap();
    let summary = run(&dir, lane(&clock), &vec![WorkItem::new("v1", ())], &mut processor);
    assert_eq!(summary.skipped, 1);
    let rows = read_ledger(&dir.path().join("out.csv")).unwrap().rows;
    assert_eq!(rows[0]["reason"], "no captions");
}
