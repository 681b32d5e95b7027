//! YouTube Data API v3 client

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tubeline_core::{ApiError, ItemError, get_text};

pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// `search.list` caps `maxResults` at 50
const SEARCH_PAGE_SIZE: usize = 50;

/// `commentThreads.list` caps `maxResults` at 100
pub const COMMENT_PAGE_SIZE: usize = 100;

/// Key-authenticated Data API client.
#[derive(Debug, Clone)]
pub struct YoutubeApi {
    base_url: String,
    api_key: String,
}

impl YoutubeApi {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn get<T: DeserializeOwned>(
        &self,
        resource: &str,
        params: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = format!("{}/{resource}", self.base_url);
        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("key", self.api_key.as_str()));
        let body = get_text(&url, &query, &[])?;
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(format!("{resource}: {e}")))
    }

    /// One page of `search.list` for videos, by relevance.
    pub fn search_page(
        &self,
        query: &str,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<SearchResponse, ApiError> {
        let max = max_results.clamp(1, SEARCH_PAGE_SIZE).to_string();
        let mut params = vec![
            ("part", "snippet"),
            ("q", query),
            ("type", "video"),
            ("order", "relevance"),
            ("maxResults", max.as_str()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }
        self.get("search", &params)
    }

    /// One page of top-level comment threads for a video, as plain text.
    pub fn comment_threads(
        &self,
        video_id: &str,
        page_token: Option<&str>,
    ) -> Result<CommentThreadsResponse, ApiError> {
        let max = COMMENT_PAGE_SIZE.to_string();
        let mut params = vec![
            ("part", "snippet"),
            ("videoId", video_id),
            ("maxResults", max.as_str()),
            ("textFormat", "plainText"),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }
        self.get("commentThreads", &params)
    }

    /// `channels.list` (snippet, statistics) for one channel id.
    pub fn channel(&self, channel_id: &str) -> Result<Option<ChannelItem>, ApiError> {
        let resp: ChannelsResponse = self.get(
            "channels",
            &[("part", "snippet,statistics"), ("id", channel_id)],
        )?;
        Ok(resp.items.into_iter().next())
    }
}

// === Response types ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(default)]
    pub items: Vec<SearchItem>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchItem {
    pub id: SearchId,
    pub snippet: VideoSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchId {
    pub video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnippet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub channel_title: String,
    #[serde(default)]
    pub published_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentThreadsResponse {
    #[serde(default)]
    pub items: Vec<CommentThread>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommentThread {
    pub snippet: CommentThreadSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentThreadSnippet {
    pub top_level_comment: TopLevelComment,
}

#[derive(Debug, Deserialize)]
pub struct TopLevelComment {
    #[serde(default)]
    pub id: String,
    pub snippet: CommentSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentSnippet {
    #[serde(default)]
    pub author_display_name: String,
    pub author_channel_id: Option<ChannelRef>,
    #[serde(default)]
    pub text_display: String,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub published_at: String,
}

#[derive(Debug, Deserialize)]
pub struct ChannelRef {
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct ChannelsResponse {
    #[serde(default)]
    pub items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
pub struct ChannelItem {
    pub id: String,
    #[serde(default)]
    pub snippet: ChannelSnippet,
    #[serde(default)]
    pub statistics: ChannelStatistics,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSnippet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub custom_url: String,
    #[serde(default)]
    pub thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
pub struct Thumbnails {
    pub default: Option<Thumbnail>,
    pub medium: Option<Thumbnail>,
    pub high: Option<Thumbnail>,
}

impl Thumbnails {
    /// Highest quality available: high > medium > default
    pub fn best_url(&self) -> &str {
        [&self.high, &self.medium, &self.default]
            .into_iter()
            .flatten()
            .map(|t| t.url.as_str())
            .next()
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
pub struct Thumbnail {
    #[serde(default)]
    pub url: String,
}

/// Counts arrive as decimal strings; hidden subscriber counts are omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatistics {
    #[serde(default)]
    pub subscriber_count: String,
    #[serde(default)]
    pub view_count: String,
    #[serde(default)]
    pub video_count: String,
}

// === Error classification ===

/// Map a Data API failure onto the engine's outcome kinds.
pub fn classify(err: ApiError) -> ItemError {
    let label = err.to_string();
    match &err {
        ApiError::Http { status, reason, .. } => match (*status, reason.as_deref()) {
            (_, Some("quotaExceeded" | "dailyLimitExceeded")) => {
                ItemError::Fatal(format!("YouTube quota exhausted: {label}"))
            }
            (401, _) | (_, Some("keyInvalid" | "accessNotConfigured" | "keyExpired")) => {
                ItemError::Fatal(format!("YouTube API key rejected: {label}"))
            }
            (_, Some("commentsDisabled" | "forbidden" | "videoNotFound" | "channelNotFound")) => {
                ItemError::Absent(reason_or(reason, &label))
            }
            (404, _) => ItemError::Absent(reason_or(reason, "not found")),
            (_, Some("rateLimitExceeded" | "userRateLimitExceeded")) => ItemError::Transient(label),
            _ if err.is_retryable() => ItemError::Transient(label),
            _ => ItemError::Permanent(label),
        },
        ApiError::Network(_) | ApiError::Decode(_) => ItemError::Transient(label),
    }
}

fn reason_or(reason: &Option<String>, fallback: &str) -> String {
    reason.clone().unwrap_or_else(|| fallback.to_string())
}
