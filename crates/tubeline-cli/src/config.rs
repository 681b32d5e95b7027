//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tubeline_core::RetryPolicy;

const YOUTUBE_KEY_VAR: &str = "YOUTUBE_API_KEY";
const OPENAI_KEY_VAR: &str = "OPENAI_API_KEY";

/// Global configuration for tubeline
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub output: OutputConfig,
    pub youtube: YoutubeConfig,
    pub openai: OpenAiConfig,
    pub transcripts: TranscriptsConfig,
    pub batch: BatchConfig,
    pub prompts: PromptsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub data_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct YoutubeConfig {
    #[serde(deserialize_with = "deserialize_env_var")]
    pub api_key: Option<String>,
    pub base_url: String,
    pub requests_per_minute: u32,
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var(YOUTUBE_KEY_VAR).ok(),
            base_url: tubeline_youtube::api::DEFAULT_BASE_URL.to_string(),
            requests_per_minute: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    #[serde(deserialize_with = "deserialize_env_var")]
    pub api_key: Option<String>,
    pub base_url: String,
    pub summary_model: String,
    pub label_model: String,
    pub vision_model: String,
    pub requests_per_minute: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var(OPENAI_KEY_VAR).ok(),
            base_url: tubeline_openai::client::DEFAULT_BASE_URL.to_string(),
            summary_model: "gpt-4o-mini".to_string(),
            label_model: "gpt-4o-mini".to_string(),
            vision_model: "gpt-4o".to_string(),
            requests_per_minute: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptsConfig {
    pub languages: Vec<String>,
    pub requests_per_minute: u32,
}

impl Default for TranscriptsConfig {
    fn default() -> Self {
        Self {
            languages: vec!["en".to_string()],
            requests_per_minute: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub flush_every: usize,
    pub max_attempts: u32,
    pub base_delay_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            flush_every: tubeline_core::DEFAULT_FLUSH_EVERY,
            max_attempts: tubeline_core::DEFAULT_MAX_ATTEMPTS,
            base_delay_secs: tubeline_core::DEFAULT_BASE_DELAY.as_secs(),
        }
    }
}

impl BatchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_secs(self.base_delay_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    pub dir: PathBuf,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./prompts"),
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value; blank results count as unset
fn expand_env_var(s: &str) -> Option<String> {
    let value = match s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        Some(var_name) => std::env::var(var_name).ok()?,
        None => s.to_string(),
    };
    (!value.trim().is_empty()).then_some(value)
}

/// `sk-p…wxyz` for long secrets, `****` for short ones
pub fn mask_secret(secret: Option<&str>) -> String {
    match secret {
        None => "not set".to_string(),
        Some(s) if s.chars().count() <= 12 => "****".to_string(),
        Some(s) => {
            let head: String = s.chars().take(4).collect();
            let skip = s.chars().count() - 4;
            let tail: String = s.chars().skip(skip).collect();
            format!("{head}…{tail}")
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./tubeline.toml (current directory)
    /// 2. ~/.config/tubeline/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("tubeline.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "tubeline") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn youtube_key(&self) -> Result<&str> {
        self.youtube.api_key.as_deref().with_context(|| {
            format!("YouTube API key not set: export {YOUTUBE_KEY_VAR} or set [youtube] api_key")
        })
    }

    pub fn openai_key(&self) -> Result<&str> {
        self.openai.api_key.as_deref().with_context(|| {
            format!("OpenAI API key not set: export {OPENAI_KEY_VAR} or set [openai] api_key")
        })
    }

    /// Setting/value pairs for `tubeline config`, secrets masked
    pub fn display_rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Data directory", self.output.data_dir.display().to_string()),
            ("Prompts directory", self.prompts.dir.display().to_string()),
            ("YouTube API key", mask_secret(self.youtube.api_key.as_deref())),
            ("YouTube base URL", self.youtube.base_url.clone()),
            ("YouTube rate", format!("{}/min", self.youtube.requests_per_minute)),
            ("Transcript languages", self.transcripts.languages.join(", ")),
            ("Transcript rate", format!("{}/min", self.transcripts.requests_per_minute)),
            ("OpenAI API key", mask_secret(self.openai.api_key.as_deref())),
            ("OpenAI base URL", self.openai.base_url.clone()),
            ("Summary model", self.openai.summary_model.clone()),
            ("Label model", self.openai.label_model.clone()),
            ("Vision model", self.openai.vision_model.clone()),
            ("OpenAI rate", format!("{}/min", self.openai.requests_per_minute)),
            ("Flush every", self.batch.flush_every.to_string()),
            ("Max attempts", self.batch.max_attempts.to_string()),
            ("Base retry delay", format!("{}s", self.batch.base_delay_secs)),
        ]
    }
}
