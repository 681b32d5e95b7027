//! `demographics` stage: vision-model inference over commenter profiles

use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;
use serde_json::{Value, json};
use tubeline_core::{
    Fields, ID_COLUMN, ItemError, ItemProcessor, RateLimiter, WorkItem, WorkSource, read_ledger,
};

use crate::client::{OpenAiClient, chat_request};
use crate::structured::{
    enum_schema, object_schema, parse_reply, require_one_of, require_unit_interval,
    response_format,
};

pub const OUTPUT_PREFIX: &str = "user_demographics";

pub const AGE_RANGES: &[&str] = &[
    "under_18", "18-24", "25-34", "35-44", "45-54", "55-64", "65_plus", "unclear",
];
pub const GENDERS: &[&str] = &["male", "female", "non_binary", "unclear"];
pub const ETHNICITIES: &[&str] = &[
    "white",
    "black_african_american",
    "hispanic_latino",
    "asian",
    "middle_eastern_north_african",
    "native_american_indigenous",
    "pacific_islander",
    "multiracial",
    "unclear",
];

const COLUMNS: &[&str] = &[
    "channel_title",
    "thumbnail_url",
    "inferred_age_range",
    "inferred_gender",
    "inferred_race_ethnicity",
    "confidence_level",
    "reasoning",
];

const SCHEMA_NAME: &str = "user_demographics";
const NOT_AVAILABLE: &str = "Not available";

/// Profile fields the model sees.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    pub channel_title: String,
    pub channel_description: String,
    pub channel_country: String,
    pub thumbnail_url: String,
}

/// `ok` rows of a profiles ledger, keyed by channel id.
#[derive(Debug, Clone)]
pub struct ProfileSource {
    path: PathBuf,
}

impl ProfileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl WorkSource for ProfileSource {
    type Payload = Profile;

    fn enumerate(&self) -> anyhow::Result<Vec<WorkItem<Profile>>> {
        let ledger = read_ledger(&self.path)
            .with_context(|| format!("Cannot load profiles {}", self.path.display()))?;
        anyhow::ensure!(
            ledger.has_column("channel_title"),
            "{} has no channel_title column",
            self.path.display()
        );
        let col = |row: &Fields, name: &str| {
            row.get(name)
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };
        Ok(ledger
            .completed_rows()
            .filter_map(|row| {
                let id = row
                    .get("author_channel_id")
                    .or_else(|| row.get(ID_COLUMN))
                    .filter(|id| !id.trim().is_empty())?;
                Some(WorkItem::new(
                    id.trim(),
                    Profile {
                        channel_title: col(row, "channel_title"),
                        channel_description: col(row, "channel_description"),
                        channel_country: col(row, "channel_country"),
                        thumbnail_url: col(row, "thumbnail_url"),
                    },
                ))
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct Demographics {
    inferred_age_range: String,
    inferred_gender: String,
    inferred_race_ethnicity: String,
    confidence_level: f64,
    reasoning: String,
}

fn validate(d: &Demographics) -> Result<(), ItemError> {
    require_one_of("inferred_age_range", &d.inferred_age_range, AGE_RANGES)?;
    require_one_of("inferred_gender", &d.inferred_gender, GENDERS)?;
    require_one_of("inferred_race_ethnicity", &d.inferred_race_ethnicity, ETHNICITIES)?;
    require_unit_interval("confidence_level", d.confidence_level)
}

fn or_not_available(s: &str) -> &str {
    if s.is_empty() { NOT_AVAILABLE } else { s }
}

pub fn user_message(p: &Profile) -> String {
    format!(
        "Username: {}\nChannel Description: {}\nCountry: {}\nProfile Image URL: {}\n\n\
         Please analyze the profile image and available information to infer demographic characteristics.",
        p.channel_title,
        or_not_available(&p.channel_description),
        or_not_available(&p.channel_country),
        p.thumbnail_url,
    )
}

#[derive(Debug, Clone)]
pub struct DemographicsProcessor {
    client: OpenAiClient,
    model: String,
    prompt: String,
}

impl DemographicsProcessor {
    pub fn new(client: OpenAiClient, model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            prompt: prompt.into(),
        }
    }

    fn request(&self, profile: &Profile) -> Value {
        let text = user_message(profile);
        // text-only when there is no picture to look at
        let content = if profile.thumbnail_url.is_empty() {
            json!(text)
        } else {
            json!([
                {"type": "text", "text": text},
                {"type": "image_url", "image_url": {"url": profile.thumbnail_url}},
            ])
        };
        let schema = object_schema(&[
            ("inferred_age_range", enum_schema(AGE_RANGES)),
            ("inferred_gender", enum_schema(GENDERS)),
            ("inferred_race_ethnicity", enum_schema(ETHNICITIES)),
            ("confidence_level", json!({"type": "number"})),
            ("reasoning", json!({"type": "string"})),
        ]);
        let mut req = chat_request(&self.model, &self.prompt, content);
        req["response_format"] = response_format(SCHEMA_NAME, schema);
        req
    }
}

impl ItemProcessor for DemographicsProcessor {
    type Payload = Profile;

    fn columns(&self) -> &'static [&'static str] {
        COLUMNS
    }

    fn key_fields(&self, item: &WorkItem<Profile>) -> Fields {
        Fields::from([
            ("channel_title".to_string(), item.payload.channel_title.clone()),
            ("thumbnail_url".to_string(), item.payload.thumbnail_url.clone()),
        ])
    }

    fn call(
        &mut self,
        item: &WorkItem<Profile>,
        _: &mut RateLimiter,
    ) -> Result<Fields, ItemError> {
        let reply = self.client.complete(&self.request(&item.payload))?;
        let d: Demographics = parse_reply(&reply)?;
        validate(&d)?;
        Ok(Fields::from([
            ("inferred_age_range".to_string(), d.inferred_age_range),
            ("inferred_gender".to_string(), d.inferred_gender),
            ("inferred_race_ethnicity".to_string(), d.inferred_race_ethnicity),
            ("confidence_level".to_string(), d.confidence_level.to_string()),
            ("reasoning".to_string(), d.reasoning),
        ]))
    }
}
