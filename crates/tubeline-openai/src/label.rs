//! `label` stage: stance and sentiment for every scraped comment

use std::path::Path;

use anyhow::Context;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::{Value, json};
use tubeline_core::{
    Fields, ID_COLUMN, ItemError, ItemProcessor, RateLimiter, WorkItem, read_ledger,
};
use tubeline_youtube::CommentItem;

use crate::client::{OpenAiClient, chat_request};
use crate::structured::{
    enum_schema, object_schema, parse_reply, require_one_of, require_unit_interval,
    response_format,
};

pub const OUTPUT_PREFIX: &str = "comment_labels";

pub const STANCES: &[&str] = &["support", "oppose", "neutral", "unrelated"];
pub const SENTIMENTS: &[&str] = &["positive", "negative", "neutral", "mixed"];

const COLUMNS: &[&str] = &[
    "video_id",
    "author",
    "comment_text",
    "stance",
    "sentiment",
    "confidence",
    "reasoning",
];

const TEMPERATURE: f64 = 0.0;

#[derive(Debug, Deserialize)]
struct CommentLabel {
    stance: String,
    sentiment: String,
    confidence: f64,
    reasoning: String,
}

/// Video id → summary, from the `ok` rows of a summaries ledger.
pub fn load_summaries(path: &Path) -> anyhow::Result<FxHashMap<String, String>> {
    let ledger = read_ledger(path)
        .with_context(|| format!("Cannot load summaries {}", path.display()))?;
    anyhow::ensure!(
        ledger.has_column("summary"),
        "{} has no summary column",
        path.display()
    );
    Ok(ledger
        .completed_rows()
        .filter_map(|row| {
            let id = row.get("video_id").or_else(|| row.get(ID_COLUMN))?;
            let summary = row.get("summary").filter(|s| !s.trim().is_empty())?;
            Some((id.trim().to_string(), summary.trim().to_string()))
        })
        .collect())
}

#[derive(Debug, Clone)]
pub struct LabelProcessor {
    client: OpenAiClient,
    model: String,
    prompt: String,
    summaries: FxHashMap<String, String>,
}

impl LabelProcessor {
    pub fn new(client: OpenAiClient, model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            prompt: prompt.into(),
            summaries: FxHashMap::default(),
        }
    }

    /// Add per-video summaries used as context for each comment.
    pub fn with_summaries(mut self, summaries: FxHashMap<String, String>) -> Self {
        self.summaries = summaries;
        self
    }

    fn user_message(&self, item: &CommentItem) -> String {
        let summary = self
            .summaries
            .get(&item.video_id)
            .map_or("Not available", String::as_str);
        let title = if item.video_title.is_empty() {
            "Not available"
        } else {
            item.video_title.as_str()
        };
        format!(
            "Video title: {title}\nVideo summary: {summary}\n\nComment:\n{}",
            item.comment.comment_text.trim()
        )
    }

    fn request(&self, item: &CommentItem) -> Value {
        let schema = object_schema(&[
            ("stance", enum_schema(STANCES)),
            ("sentiment", enum_schema(SENTIMENTS)),
            ("confidence", json!({"type": "number"})),
            ("reasoning", json!({"type": "string"})),
        ]);
        let mut req = chat_request(&self.model, &self.prompt, json!(self.user_message(item)));
        req["temperature"] = json!(TEMPERATURE);
        req["response_format"] = response_format("comment_label", schema);
        req
    }
}

fn validate(label: &CommentLabel) -> Result<(), ItemError> {
    require_one_of("stance", &label.stance, STANCES)?;
    require_one_of("sentiment", &label.sentiment, SENTIMENTS)?;
    require_unit_interval("confidence", label.confidence)
}

impl ItemProcessor for LabelProcessor {
    type Payload = CommentItem;

    fn columns(&self) -> &'static [&'static str] {
        COLUMNS
    }

    fn key_fields(&self, item: &WorkItem<CommentItem>) -> Fields {
        let c = &item.payload;
        Fields::from([
            ("video_id".to_string(), c.video_id.clone()),
            ("author".to_string(), c.comment.author.clone()),
            ("comment_text".to_string(), c.comment.comment_text.clone()),
        ])
    }

    fn call(
        &mut self,
        item: &WorkItem<CommentItem>,
        _: &mut RateLimiter,
    ) -> Result<Fields, ItemError> {
        if item.payload.comment.comment_text.trim().is_empty() {
            return Err(ItemError::Absent("empty comment".into()));
        }
        let reply = self.client.complete(&self.request(&item.payload))?;
        let label: CommentLabel = parse_reply(&reply)?;
        validate(&label)?;
        Ok(Fields::from([
            ("stance".to_string(), label.stance),
            ("sentiment".to_string(), label.sentiment),
            ("confidence".to_string(), label.confidence.to_string()),
            ("reasoning".to_string(), label.reasoning),
        ]))
    }
}
