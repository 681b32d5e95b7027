//! Tubeline OpenAI - chat-completions client and the model-backed stages
//!
//! - `summarize`: transcript → short summary
//! - `label`: comment → stance, sentiment, confidence
//! - `demographics`: channel profile (+ avatar) → inferred demographics

pub mod client;
pub mod demographics;
pub mod label;
pub mod prompt;
pub mod structured;
pub mod summarize;

// Re-exports
pub use client::{ChatCompletion, OpenAiClient, classify};
pub use demographics::{DemographicsProcessor, Profile, ProfileSource};
pub use label::{LabelProcessor, load_summaries};
pub use prompt::{DEMOGRAPHICS_PROMPT, LABEL_PROMPT, SUMMARIZE_PROMPT, load_prompt};
pub use summarize::{SummarizeProcessor, Transcript, TranscriptSource};
