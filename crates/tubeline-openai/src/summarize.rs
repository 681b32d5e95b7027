//! `summarize` stage: one short summary per video transcript

use std::path::PathBuf;

use anyhow::Context;
use serde_json::{Value, json};
use tubeline_core::{
    Fields, ID_COLUMN, ItemError, ItemProcessor, RateLimiter, WorkItem, WorkSource, read_ledger,
};

use crate::client::{OpenAiClient, chat_request};

pub const OUTPUT_PREFIX: &str = "video_summaries";

const COLUMNS: &[&str] = &["summary", "is_generated", "language", "language_code"];

const TEMPERATURE: f64 = 0.3;
const MAX_TOKENS: u32 = 500;

/// Transcript columns carried through to the summary row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub is_generated: String,
    pub language: String,
    pub language_code: String,
}

/// `ok` rows of a transcripts ledger, keyed by video id.
#[derive(Debug, Clone)]
pub struct TranscriptSource {
    path: PathBuf,
}

impl TranscriptSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl WorkSource for TranscriptSource {
    type Payload = Transcript;

    fn enumerate(&self) -> anyhow::Result<Vec<WorkItem<Transcript>>> {
        let ledger = read_ledger(&self.path)
            .with_context(|| format!("Cannot load transcripts {}", self.path.display()))?;
        anyhow::ensure!(
            ledger.has_column("transcript"),
            "{} has no transcript column",
            self.path.display()
        );
        let col = |row: &Fields, name: &str| row.get(name).cloned().unwrap_or_default();
        Ok(ledger
            .completed_rows()
            .filter_map(|row| {
                let id = row
                    .get("video_id")
                    .or_else(|| row.get(ID_COLUMN))
                    .filter(|id| !id.trim().is_empty())?;
                Some(WorkItem::new(
                    id.trim(),
                    Transcript {
                        text: col(row, "transcript"),
                        is_generated: col(row, "is_generated"),
                        language: col(row, "language"),
                        language_code: col(row, "language_code"),
                    },
                ))
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct SummarizeProcessor {
    client: OpenAiClient,
    model: String,
    prompt: String,
}

impl SummarizeProcessor {
    pub fn new(client: OpenAiClient, model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            prompt: prompt.into(),
        }
    }

    fn request(&self, transcript: &str) -> Value {
        let user = json!(format!("Transcript:\n\n{transcript}"));
        let mut req = chat_request(&self.model, &self.prompt, user);
        req["temperature"] = json!(TEMPERATURE);
        req["max_tokens"] = json!(MAX_TOKENS);
        req
    }
}

impl ItemProcessor for SummarizeProcessor {
    type Payload = Transcript;

    fn columns(&self) -> &'static [&'static str] {
        COLUMNS
    }

    fn key_fields(&self, item: &WorkItem<Transcript>) -> Fields {
        let t = &item.payload;
        Fields::from([
            ("is_generated".to_string(), t.is_generated.clone()),
            ("language".to_string(), t.language.clone()),
            ("language_code".to_string(), t.language_code.clone()),
        ])
    }

    fn call(
        &mut self,
        item: &WorkItem<Transcript>,
        _: &mut RateLimiter,
    ) -> Result<Fields, ItemError> {
        let text = item.payload.text.trim();
        if text.is_empty() {
            return Err(ItemError::Absent("empty transcript".into()));
        }
        let summary = self.client.complete(&self.request(text))?;
        Ok(Fields::from([("summary".to_string(), summary)]))
    }
}
