//! tubeline - Resumable YouTube research pipeline
//!
//! Scrapes videos and comments, fetches transcripts and commenter profiles,
//! and runs model-backed summarization, labeling and demographic inference.
//! Every stage writes a CSV ledger that doubles as its resume checkpoint.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

mod cmd;
mod config;

use cmd::stage::StageContext;
use config::Config;

/// Exit code for configuration and setup errors (nothing was processed)
const EXIT_CONFIG: u8 = 2;

#[derive(Parser)]
#[command(name = "tubeline")]
#[command(about = "Resumable, rate-limited YouTube research pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./tubeline.toml or ~/.config/tubeline/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Flush the ledger after this many processed items
    #[arg(long, global = true)]
    flush_every: Option<usize>,

    /// Total attempts per item for transient failures
    #[arg(long, global = true)]
    max_attempts: Option<u32>,

    /// Requests per minute for the stage's API (overrides every lane)
    #[arg(long, global = true)]
    rpm: Option<u32>,
}

#[derive(Subcommand)]
enum Command {
    /// Search videos and collect their top-level comments
    Scrape(cmd::stage::ScrapeArgs),
    /// Fetch caption transcripts for scraped videos
    Transcripts(cmd::stage::TranscriptsArgs),
    /// Summarize transcripts with a chat model
    Summarize(cmd::stage::ModelArgs),
    /// Label comment stance and sentiment
    Label(cmd::stage::LabelArgs),
    /// Fetch channel profiles of commenters
    Profiles(cmd::stage::InputArgs),
    /// Infer commenter demographics from their profiles
    Demographics(cmd::stage::ModelArgs),
    /// Show status counts and failure reasons of a ledger
    Status(cmd::status::StatusArgs),
    /// Remove failed rows from a ledger so they are retried
    PruneFailed(cmd::prune::PruneArgs),
    /// Show current configuration
    Config,
}

impl Cli {
    /// Global flags win over the config file
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(n) = self.flush_every {
            config.batch.flush_every = n;
        }
        if let Some(n) = self.max_attempts {
            config.batch.max_attempts = n;
        }
        if let Some(rpm) = self.rpm {
            config.youtube.requests_per_minute = rpm;
            config.transcripts.requests_per_minute = rpm;
            config.openai.requests_per_minute = rpm;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(tubeline_core::ProgressContext::new());

    // Logging:
    //   TTY:     warn unless --debug  (progress bars show activity)
    //   non-TTY: info unless --debug  (logs are the only progress indicator)
    let multi = progress.is_tty().then(|| progress.multi());
    tubeline_core::init_logging(cli.debug, multi);

    match run(cli, &progress) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

fn run(cli: Cli, progress: &tubeline_core::SharedProgress) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    cli.apply_overrides(&mut config);

    let ctx = StageContext {
        config: &config,
        progress,
    };
    match cli.command {
        Command::Scrape(args) => cmd::stage::scrape(args, &ctx),
        Command::Transcripts(args) => cmd::stage::transcripts(args, &ctx),
        Command::Summarize(args) => cmd::stage::summarize(args, &ctx),
        Command::Label(args) => cmd::stage::label(args, &ctx),
        Command::Profiles(args) => cmd::stage::profiles(args, &ctx),
        Command::Demographics(args) => cmd::stage::demographics(args, &ctx),
        Command::Status(args) => cmd::status::run(args, progress).map(|()| ExitCode::SUCCESS),
        Command::PruneFailed(args) => cmd::prune::run(args).map(|()| ExitCode::SUCCESS),
        Command::Config => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Setting").fg(Color::Cyan),
                    Cell::new("Value").fg(Color::Cyan),
                ]);
            for (setting, value) in config.display_rows() {
                table.add_row(vec![Cell::new(setting), Cell::new(value)]);
            }
            eprintln!("\n{table}");
            Ok(ExitCode::SUCCESS)
        }
    }
}
