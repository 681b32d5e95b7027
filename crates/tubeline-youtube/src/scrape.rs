//! `scrape` stage: search videos, then collect every top-level comment per video

use tubeline_core::{Fields, ItemError, ItemProcessor, RateLimiter, WorkItem};

use crate::api::{YoutubeApi, classify};
use crate::sources::Comment;

pub const OUTPUT_PREFIX: &str = "youtube_comments";
pub const COMMENTS_COLUMN: &str = "comments_json";

const COLUMNS: &[&str] = &[
    "title",
    "channel",
    "published_at",
    "comment_count",
    COMMENTS_COLUMN,
];

/// Search hit carried as the work item payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Video {
    pub title: String,
    pub channel: String,
    pub published_at: String,
}

/// Run the search up front and turn the hits into work items.
///
/// Every page request passes through `lane`, the same lane the comment
/// fetches use afterwards. Search failures are not retried here: the caller
/// treats them as a failed start.
pub fn search_videos(
    api: &YoutubeApi,
    lane: &mut RateLimiter,
    query: &str,
    max_videos: usize,
) -> Result<Vec<WorkItem<Video>>, ItemError> {
    let mut videos: Vec<WorkItem<Video>> = Vec::new();
    let mut page_token: Option<String> = None;

    while videos.len() < max_videos {
        lane.wait_if_needed();
        let page = api
            .search_page(query, max_videos - videos.len(), page_token.as_deref())
            .map_err(classify)?;

        for item in page.items {
            let Some(video_id) = item.id.video_id.filter(|id| !id.is_empty()) else {
                continue;
            };
            if videos.len() >= max_videos {
                break;
            }
            videos.push(WorkItem::new(
                video_id,
                Video {
                    title: item.snippet.title,
                    channel: item.snippet.channel_title,
                    published_at: item.snippet.published_at,
                },
            ));
        }

        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => break,
        }
    }

    log::info!("Search {query:?}: {} videos", videos.len());
    Ok(videos)
}

/// Fetches all comment pages for one video into a single ledger row.
#[derive(Debug, Clone)]
pub struct ScrapeProcessor {
    api: YoutubeApi,
}

impl ScrapeProcessor {
    pub fn new(api: YoutubeApi) -> Self {
        Self { api }
    }
}

impl ItemProcessor for ScrapeProcessor {
    type Payload = Video;

    fn columns(&self) -> &'static [&'static str] {
        COLUMNS
    }

    fn key_fields(&self, item: &WorkItem<Video>) -> Fields {
        Fields::from([
            ("title".to_string(), item.payload.title.clone()),
            ("channel".to_string(), item.payload.channel.clone()),
            ("published_at".to_string(), item.payload.published_at.clone()),
        ])
    }

    fn call(
        &mut self,
        item: &WorkItem<Video>,
        lane: &mut RateLimiter,
    ) -> Result<Fields, ItemError> {
        let mut comments = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            if pages > 0 {
                lane.wait_if_needed();
            }
            let page = self
                .api
                .comment_threads(&item.id, page_token.as_deref())
                .map_err(classify)?;
            pages += 1;

            comments.extend(page.items.into_iter().map(|thread| {
                let top = thread.snippet.top_level_comment;
                Comment {
                    comment_id: top.id,
                    author: top.snippet.author_display_name,
                    author_channel_id: top
                        .snippet
                        .author_channel_id
                        .map(|c| c.value)
                        .unwrap_or_default(),
                    comment_text: top.snippet.text_display,
                    like_count: top.snippet.like_count,
                    published_at: top.snippet.published_at,
                }
            }));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        log::debug!("{}: {} comments over {pages} pages", item.id, comments.len());
        let json = serde_json::to_string(&comments)
            .map_err(|e| ItemError::Permanent(format!("cannot encode comments: {e}")))?;
        Ok(Fields::from([
            ("comment_count".to_string(), comments.len().to_string()),
            (COMMENTS_COLUMN.to_string(), json),
        ]))
    }
}
