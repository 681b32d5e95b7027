//! Tubeline YouTube - Data API client and the YouTube-backed stages
//!
//! - `scrape`: search + comment threads, one ledger row per video
//! - `transcripts`: caption tracks from the watch page, no API key
//! - `profiles`: `channels.list` for every distinct commenter

pub mod api;
pub mod profiles;
pub mod scrape;
pub mod sources;
pub mod transcripts;

// Re-exports
pub use api::{YoutubeApi, classify};
pub use profiles::ProfilesProcessor;
pub use scrape::{ScrapeProcessor, Video, search_videos};
pub use sources::{
    ChannelSource, Comment, CommentItem, CommentSource, Commenter, VideoSource, comment_key,
};
pub use transcripts::TranscriptsProcessor;
