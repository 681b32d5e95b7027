//! System prompts, kept as markdown files next to the data

use std::path::Path;

use anyhow::Context;

pub const SUMMARIZE_PROMPT: &str = "summarize_video.md";
pub const LABEL_PROMPT: &str = "label_comment.md";
pub const DEMOGRAPHICS_PROMPT: &str = "infer_demographics.md";

/// Read `<dir>/<name>`; a missing or blank prompt is a configuration error.
pub fn load_prompt(dir: &Path, name: &str) -> anyhow::Result<String> {
    let path = dir.join(name);
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Cannot read prompt file {}", path.display()))?;
    let text = text.trim();
    anyhow::ensure!(!text.is_empty(), "Prompt file {} is empty", path.display());
    Ok(text.to_string())
}
