//! `profiles` stage: public channel metadata for each commenter

use tubeline_core::{Fields, ItemError, ItemProcessor, RateLimiter, WorkItem};

use crate::api::{YoutubeApi, classify};
use crate::sources::Commenter;

pub const OUTPUT_PREFIX: &str = "user_profiles";

pub const COLUMNS: &[&str] = &[
    "channel_title",
    "channel_description",
    "channel_country",
    "channel_custom_url",
    "thumbnail_url",
    "subscriber_count",
    "view_count",
    "video_count",
];

#[derive(Debug, Clone)]
pub struct ProfilesProcessor {
    api: YoutubeApi,
}

impl ProfilesProcessor {
    pub fn new(api: YoutubeApi) -> Self {
        Self { api }
    }
}

impl ItemProcessor for ProfilesProcessor {
    type Payload = Commenter;

    fn columns(&self) -> &'static [&'static str] {
        COLUMNS
    }

    fn call(
        &mut self,
        item: &WorkItem<Commenter>,
        _: &mut RateLimiter,
    ) -> Result<Fields, ItemError> {
        let Some(channel) = self.api.channel(&item.id).map_err(classify)? else {
            return Err(ItemError::Absent("channelNotFound".into()));
        };
        let snippet = channel.snippet;
        let stats = channel.statistics;
        let title = if snippet.title.is_empty() {
            item.payload.author.clone()
        } else {
            snippet.title
        };
        Ok(Fields::from([
            ("channel_title".to_string(), title),
            ("channel_description".to_string(), snippet.description),
            ("channel_country".to_string(), snippet.country),
            ("channel_custom_url".to_string(), snippet.custom_url),
            ("thumbnail_url".to_string(), snippet.thumbnails.best_url().to_string()),
            ("subscriber_count".to_string(), stats.subscriber_count),
            ("view_count".to_string(), stats.view_count),
            ("video_count".to_string(), stats.video_count),
        ]))
    }
}
