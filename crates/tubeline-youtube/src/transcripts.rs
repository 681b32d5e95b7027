//! `transcripts` stage: caption track discovery and json3 timed-text download.
//!
//! No API key is involved: the watch page lists the caption tracks, and each
//! track's `baseUrl` serves the timed text. The watch page and the track
//! fetch are two requests, both paced by the lane.

use serde::Deserialize;
use tubeline_core::{ApiError, Fields, ItemError, ItemProcessor, RateLimiter, WorkItem, get_text};

pub const OUTPUT_PREFIX: &str = "transcripts";
pub const DEFAULT_WATCH_BASE: &str = "https://www.youtube.com";

const COLUMNS: &[&str] = &[
    "is_generated",
    "language",
    "language_code",
    "segment_count",
    "transcript",
];

const CAPTION_TRACKS_KEY: &str = "\"captionTracks\":";
const PLAYABILITY_KEY: &str = "\"playabilityStatus\":";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionTrack {
    pub base_url: String,
    #[serde(default)]
    pub language_code: String,
    #[serde(default)]
    pub name: TrackName,
    /// `"asr"` for automatically generated captions
    #[serde(default)]
    pub kind: Option<String>,
}

impl CaptionTrack {
    pub fn is_generated(&self) -> bool {
        self.kind.as_deref() == Some("asr")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackName {
    pub simple_text: Option<String>,
    #[serde(default)]
    pub runs: Vec<TextRun>,
}

impl TrackName {
    pub fn text(&self) -> String {
        match &self.simple_text {
            Some(s) => s.clone(),
            None => self.runs.iter().map(|r| r.text.as_str()).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextRun {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct Playability {
    #[serde(default)]
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TimedText {
    #[serde(default)]
    events: Vec<TimedEvent>,
}

#[derive(Debug, Deserialize)]
struct TimedEvent {
    #[serde(default)]
    segs: Vec<TimedSeg>,
}

#[derive(Debug, Deserialize)]
struct TimedSeg {
    #[serde(default)]
    utf8: String,
}

/// Parse the first JSON value found right after `key` in `haystack`.
fn json_after<'a, T: Deserialize<'a>>(haystack: &'a str, key: &str) -> Option<T> {
    let start = haystack.find(key)? + key.len();
    serde_json::Deserializer::from_str(&haystack[start..])
        .into_iter::<T>()
        .next()?
        .ok()
}

/// Caption tracks listed in a watch page.
///
/// `Ok(empty)` means the video plays but has no captions; an unplayable
/// video is `Absent`, a bot check is `Fatal` (every further request would
/// hit it too).
pub fn caption_tracks(html: &str) -> Result<Vec<CaptionTrack>, ItemError> {
    if html.contains("class=\"g-recaptcha\"") {
        return Err(ItemError::Fatal(
            "YouTube is answering with a captcha; requests from this address are blocked".into(),
        ));
    }
    if let Some(p) = json_after::<Playability>(html, PLAYABILITY_KEY) {
        if !p.status.is_empty() && p.status != "OK" {
            let why = p.reason.unwrap_or_default();
            let reason = format!("video unplayable: {} {why}", p.status);
            return Err(ItemError::Absent(reason.trim().to_string()));
        }
    }
    Ok(json_after::<Vec<CaptionTrack>>(html, CAPTION_TRACKS_KEY).unwrap_or_default())
}

/// Pick a track: manual in a preferred language, then generated in a
/// preferred language (both in preference order), then the first listed.
pub fn select_track<'a>(
    tracks: &'a [CaptionTrack],
    languages: &[String],
) -> Option<&'a CaptionTrack> {
    let find = |generated: bool| {
        languages.iter().find_map(|lang| {
            tracks.iter().find(|t| {
                t.is_generated() == generated && t.language_code.eq_ignore_ascii_case(lang)
            })
        })
    };
    find(false).or_else(|| find(true)).or_else(|| tracks.first())
}

/// Non-breaking spaces and newlines become spaces; runs of whitespace collapse.
pub fn clean_text(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cleaned, non-empty segment texts from a json3 timed-text document.
fn segments(body: &str) -> Result<Vec<String>, ItemError> {
    let doc: TimedText = serde_json::from_str(body)
        .map_err(|e| ItemError::Transient(format!("invalid timed text: {e}")))?;
    Ok(doc
        .events
        .iter()
        .map(|ev| clean_text(&ev.segs.iter().map(|s| s.utf8.as_str()).collect::<String>()))
        .filter(|s| !s.is_empty())
        .collect())
}

fn classify(err: ApiError) -> ItemError {
    match err.status() {
        Some(404 | 410) => ItemError::Absent(err.to_string()),
        _ if err.is_retryable() => ItemError::Transient(err.to_string()),
        Some(403) => ItemError::Transient(err.to_string()),
        _ => ItemError::Permanent(err.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptsProcessor {
    watch_base: String,
    languages: Vec<String>,
}

impl TranscriptsProcessor {
    pub fn new(languages: Vec<String>) -> Self {
        Self::with_watch_base(DEFAULT_WATCH_BASE, languages)
    }

    pub fn with_watch_base(watch_base: impl Into<String>, languages: Vec<String>) -> Self {
        Self {
            watch_base: watch_base.into().trim_end_matches('/').to_string(),
            languages,
        }
    }
}

impl ItemProcessor for TranscriptsProcessor {
    type Payload = ();

    fn columns(&self) -> &'static [&'static str] {
        COLUMNS
    }

    fn call(&mut self, item: &WorkItem<()>, lane: &mut RateLimiter) -> Result<Fields, ItemError> {
        let watch_url = format!("{}/watch", self.watch_base);
        let html = get_text(
            &watch_url,
            &[("v", item.id.as_str())],
            &[("Accept-Language", "en-US,en;q=0.9")],
        )
        .map_err(classify)?;

        let tracks = caption_tracks(&html)?;
        let Some(track) = select_track(&tracks, &self.languages) else {
            return Err(ItemError::Absent("no captions".into()));
        };
        log::debug!(
            "{}: {} tracks, using {} ({})",
            item.id,
            tracks.len(),
            track.language_code,
            if track.is_generated() { "generated" } else { "manual" }
        );

        lane.wait_if_needed();
        let body = get_text(&track.base_url, &[("fmt", "json3")], &[]).map_err(classify)?;
        let segments = segments(&body)?;
        if segments.is_empty() {
            return Err(ItemError::Absent("caption track is empty".into()));
        }

        Ok(Fields::from([
            ("is_generated".to_string(), track.is_generated().to_string()),
            ("language".to_string(), track.name.text()),
            ("language_code".to_string(), track.language_code.clone()),
            ("segment_count".to_string(), segments.len().to_string()),
            ("transcript".to_string(), segments.join(" ")),
        ]))
    }
}
