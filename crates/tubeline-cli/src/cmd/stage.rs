//! Stage subcommands: resolve ledgers, build the processor, hand off to the batch runner

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use tubeline_core::{
    BatchRunner, CheckpointStore, ItemProcessor, RateLimiter, RunOptions, SharedProgress,
    WorkSource, default_output, latest_matching, resolve_input,
};
use tubeline_openai::demographics::OUTPUT_PREFIX as DEMOGRAPHICS_PREFIX;
use tubeline_openai::label::OUTPUT_PREFIX as LABELS_PREFIX;
use tubeline_openai::summarize::OUTPUT_PREFIX as SUMMARIES_PREFIX;
use tubeline_openai::{
    DEMOGRAPHICS_PROMPT, DemographicsProcessor, LABEL_PROMPT, LabelProcessor, OpenAiClient,
    ProfileSource, SUMMARIZE_PROMPT, SummarizeProcessor, TranscriptSource, load_prompt,
    load_summaries,
};
use tubeline_youtube::profiles::OUTPUT_PREFIX as PROFILES_PREFIX;
use tubeline_youtube::scrape::OUTPUT_PREFIX as COMMENTS_PREFIX;
use tubeline_youtube::transcripts::OUTPUT_PREFIX as TRANSCRIPTS_PREFIX;
use tubeline_youtube::{
    ChannelSource, CommentSource, ProfilesProcessor, ScrapeProcessor, TranscriptsProcessor,
    VideoSource, YoutubeApi, search_videos,
};

use crate::config::Config;

/// Output ledger selection and item limit, shared by every stage
#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Output ledger; an existing file is resumed
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Resume the newest ledger of this stage in the data directory
    #[arg(long, conflicts_with = "output")]
    pub resume: bool,

    /// Maximum number of new items to process
    #[arg(short = 'l', long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ScrapeArgs {
    /// Search query
    #[arg(short, long, default_value = "NYC congestion pricing")]
    pub query: String,

    /// Number of videos to take from the search, by relevance
    #[arg(long, default_value_t = 10)]
    pub max_videos: usize,

    #[command(flatten)]
    pub out: OutputArgs,
}

#[derive(Args, Debug)]
pub struct InputArgs {
    /// Input ledger (default: newest matching ledger in the data directory)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    #[command(flatten)]
    pub out: OutputArgs,
}

#[derive(Args, Debug)]
pub struct TranscriptsArgs {
    #[command(flatten)]
    pub io: InputArgs,

    /// Preferred caption languages, in order (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub languages: Option<Vec<String>>,
}

#[derive(Args, Debug)]
pub struct ModelArgs {
    #[command(flatten)]
    pub io: InputArgs,

    /// Model override
    #[arg(short, long)]
    pub model: Option<String>,
}

#[derive(Args, Debug)]
pub struct LabelArgs {
    #[command(flatten)]
    pub io: InputArgs,

    /// Model override
    #[arg(short, long)]
    pub model: Option<String>,

    /// Summaries ledger giving each comment its video's context
    #[arg(long)]
    pub summaries: Option<PathBuf>,
}

/// Pick the output ledger: explicit path, newest existing one, or a fresh timestamped name.
fn output_path(args: &OutputArgs, data_dir: &Path, prefix: &str) -> Result<PathBuf> {
    let path = match (&args.output, args.resume) {
        (Some(path), _) => path.clone(),
        (None, true) => latest_matching(data_dir, prefix).with_context(|| {
            format!("No {prefix}_*.csv ledger in {} to resume", data_dir.display())
        })?,
        (None, false) => default_output(data_dir, prefix),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create {}", parent.display()))?;
    }
    Ok(path)
}

/// What every stage run needs from the command line and the config file
pub struct StageContext<'a> {
    pub config: &'a Config,
    pub progress: &'a SharedProgress,
}

impl StageContext<'_> {
    /// Open the ledger, run the stage to completion or abort, report the summary.
    fn execute<S, P>(
        &self,
        stage: &str,
        output: &Path,
        limit: Option<usize>,
        lane: RateLimiter,
        source: &S,
        processor: &mut P,
    ) -> Result<ExitCode>
    where
        S: WorkSource,
        P: ItemProcessor<Payload = S::Payload>,
    {
        let store = CheckpointStore::open(output, processor.columns())
            .with_context(|| format!("{stage}: cannot open ledger"))?;
        if store.rows_on_disk() == 0 {
            log::info!("{stage}: writing {}", output.display());
        }

        let options = RunOptions {
            flush_every: self.config.batch.flush_every,
            limit,
            retry: self.config.batch.retry_policy(),
        };
        let summary = BatchRunner::new(stage, store, lane, options, self.progress.clone())
            .run(source, processor)?;

        if self.progress.is_tty() {
            summary.print();
        } else {
            summary.log();
        }
        Ok(summary.exit_code())
    }

    fn data_dir(&self) -> &Path {
        &self.config.output.data_dir
    }
}

fn youtube_api(config: &Config) -> Result<YoutubeApi> {
    Ok(YoutubeApi::with_base_url(&config.youtube.base_url, config.youtube_key()?))
}

fn openai_client(config: &Config) -> Result<OpenAiClient> {
    Ok(OpenAiClient::with_base_url(&config.openai.base_url, config.openai_key()?))
}

fn input_path(args: &InputArgs, data_dir: &Path, prefix: &str) -> Result<PathBuf> {
    let path = resolve_input(args.input.as_deref(), data_dir, prefix)?;
    log::info!("Input: {}", path.display());
    Ok(path)
}

pub fn scrape(args: ScrapeArgs, ctx: &StageContext) -> Result<ExitCode> {
    let api = youtube_api(ctx.config)?;
    let output = output_path(&args.out, ctx.data_dir(), COMMENTS_PREFIX)?;
    let mut lane = RateLimiter::per_minute(ctx.config.youtube.requests_per_minute);

    log::info!("Searching {:?} (up to {} videos)", args.query, args.max_videos);
    let spinner = ctx
        .progress
        .spinner("scrape", format!("searching {:?}", args.query));
    let found = search_videos(&api, &mut lane, &args.query, args.max_videos);
    spinner.finish_and_clear();
    let videos = found.map_err(|e| anyhow::anyhow!("Video search failed: {}", e.reason()))?;
    anyhow::ensure!(!videos.is_empty(), "No videos found for {:?}", args.query);

    let mut processor = ScrapeProcessor::new(api);
    ctx.execute("scrape", &output, args.out.limit, lane, &videos, &mut processor)
}

pub fn transcripts(args: TranscriptsArgs, ctx: &StageContext) -> Result<ExitCode> {
    let input = input_path(&args.io, ctx.data_dir(), COMMENTS_PREFIX)?;
    let output = output_path(&args.io.out, ctx.data_dir(), TRANSCRIPTS_PREFIX)?;
    let languages = args
        .languages
        .unwrap_or_else(|| ctx.config.transcripts.languages.clone());
    let lane = RateLimiter::per_minute(ctx.config.transcripts.requests_per_minute);

    let mut processor = TranscriptsProcessor::new(languages);
    let source = VideoSource::new(input);
    ctx.execute("transcripts", &output, args.io.out.limit, lane, &source, &mut processor)
}

pub fn summarize(args: ModelArgs, ctx: &StageContext) -> Result<ExitCode> {
    let client = openai_client(ctx.config)?;
    let prompt = load_prompt(&ctx.config.prompts.dir, SUMMARIZE_PROMPT)?;
    let input = input_path(&args.io, ctx.data_dir(), TRANSCRIPTS_PREFIX)?;
    let output = output_path(&args.io.out, ctx.data_dir(), SUMMARIES_PREFIX)?;
    let model = args
        .model
        .unwrap_or_else(|| ctx.config.openai.summary_model.clone());
    let lane = RateLimiter::per_minute(ctx.config.openai.requests_per_minute);

    let mut processor = SummarizeProcessor::new(client, model, prompt);
    let source = TranscriptSource::new(input);
    ctx.execute("summarize", &output, args.io.out.limit, lane, &source, &mut processor)
}

pub fn label(args: LabelArgs, ctx: &StageContext) -> Result<ExitCode> {
    let client = openai_client(ctx.config)?;
    let prompt = load_prompt(&ctx.config.prompts.dir, LABEL_PROMPT)?;
    let input = input_path(&args.io, ctx.data_dir(), COMMENTS_PREFIX)?;
    let output = output_path(&args.io.out, ctx.data_dir(), LABELS_PREFIX)?;
    let model = args
        .model
        .unwrap_or_else(|| ctx.config.openai.label_model.clone());
    let lane = RateLimiter::per_minute(ctx.config.openai.requests_per_minute);

    let mut processor = LabelProcessor::new(client, model, prompt);
    if let Some(path) = &args.summaries {
        let summaries = load_summaries(path)?;
        log::info!("Loaded {} video summaries from {}", summaries.len(), path.display());
        processor = processor.with_summaries(summaries);
    }

    let source = CommentSource::new(input);
    ctx.execute("label", &output, args.io.out.limit, lane, &source, &mut processor)
}

pub fn profiles(args: InputArgs, ctx: &StageContext) -> Result<ExitCode> {
    let api = youtube_api(ctx.config)?;
    let input = input_path(&args, ctx.data_dir(), COMMENTS_PREFIX)?;
    let output = output_path(&args.out, ctx.data_dir(), PROFILES_PREFIX)?;
    let lane = RateLimiter::per_minute(ctx.config.youtube.requests_per_minute);

    let mut processor = ProfilesProcessor::new(api);
    let source = ChannelSource::new(input);
    ctx.execute("profiles", &output, args.out.limit, lane, &source, &mut processor)
}

pub fn demographics(args: ModelArgs, ctx: &StageContext) -> Result<ExitCode> {
    let client = openai_client(ctx.config)?;
    let prompt = load_prompt(&ctx.config.prompts.dir, DEMOGRAPHICS_PROMPT)?;
    let input = input_path(&args.io, ctx.data_dir(), PROFILES_PREFIX)?;
    let output = output_path(&args.io.out, ctx.data_dir(), DEMOGRAPHICS_PREFIX)?;
    let model = args
        .model
        .unwrap_or_else(|| ctx.config.openai.vision_model.clone());
    let lane = RateLimiter::per_minute(ctx.config.openai.requests_per_minute);

    let mut processor = DemographicsProcessor::new(client, model, prompt);
    let source = ProfileSource::new(input);
    ctx.execute("demographics", &output, args.io.out.limit, lane, &source, &mut processor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn out(output: Option<&Path>, resume: bool) -> OutputArgs {
        OutputArgs {
            output: output.map(Path::to_path_buf),
            resume,
            limit: None,
        }
    }

    #[test]
    fn explicit_output_wins() {
        let dir = tempfile::TempDir::new().unwrap();
        let explicit = dir.path().join("nested/mine.csv");
        let path = output_path(&out(Some(&explicit), false), dir.path(), "transcripts").unwrap();
        assert_eq!(path, explicit);
        assert!(dir.path().join("nested").is_dir());
    }

    #[test]
    fn fresh_output_is_timestamped() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = output_path(&out(None, false), dir.path(), "transcripts").unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("transcripts_"));
        assert!(name.ends_with(".csv"));
    }

    #[test]
    fn fresh_output_never_reuses_an_existing_ledger() {
        let dir = tempfile::TempDir::new().unwrap();
        let first = output_path(&out(None, false), dir.path(), "youtube_comments").unwrap();
        std::fs::write(&first, "id,status,reason\nv1,ok,\n").unwrap();

        let second = output_path(&out(None, false), dir.path(), "youtube_comments").unwrap();
        assert_ne!(first, second);
        assert!(!second.exists());
    }

    #[test]
    fn resume_picks_existing_ledger() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(output_path(&out(None, true), dir.path(), "transcripts").is_err());

        let existing = dir.path().join("transcripts_20240101_0000.csv");
        std::fs::write(&existing, "id,status,reason\n").unwrap();
        assert_eq!(output_path(&out(None, true), dir.path(), "transcripts").unwrap(), existing);
    }
}
