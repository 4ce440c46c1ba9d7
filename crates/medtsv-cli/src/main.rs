//! medtsv - PubMed baseline to TSV converter
//!
//! Downloads a range of PubMed baseline archives and writes one quoted TSV
//! row per article into fixed-size chunk files.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "medtsv")]
#[command(about = "Convert PubMed baseline archives into chunked TSV")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./medtsv.toml or ~/.config/medtsv/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also append log lines to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Read timeout in seconds for stall detection
    #[arg(long, global = true)]
    read_timeout: Option<u64>,

    /// Maximum fetch attempts per file
    #[arg(long, global = true)]
    max_attempts: Option<u32>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch baseline files and convert them to TSV
    Fetch(cmd::fetch::FetchArgs),
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(medtsv_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug; the status line shows activity
    //   non-TTY: info unless --debug; logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    if let Err(e) = medtsv_core::init_logging(quiet, cli.debug, multi, cli.log_file.as_deref()) {
        eprintln!("Failed to open log file: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli, &progress) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, progress: &medtsv_core::SharedProgress) -> Result<ExitCode> {
    // Load configuration
    let mut config = if let Some(path) = &cli.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };

    // CLI overrides config file
    if let Some(secs) = cli.read_timeout {
        config.http.read_timeout = secs;
    }
    if let Some(n) = cli.max_attempts {
        config.retry.max_attempts = n;
    }
    medtsv_core::set_http_config(config.http.to_http_config());

    match cli.command {
        Command::Fetch(args) => {
            medtsv_core::install_signal_handlers()?;
            cmd::fetch::run(args, &config, progress)
        }
        Command::Config => {
            print_config(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_config(config: &Config) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let secs = |s: u64| format!("{s}s");

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec![
        "Output directory",
        &config.output.default_dir.display().to_string(),
    ]);
    table.add_row(vec![
        "Chunk",
        &format!(
            "{}_NNNN.tsv, {} rows",
            config.output.chunk_prefix, config.output.chunk_rows
        ),
    ]);
    table.add_row(vec!["PM base URL", &config.pubmed.base_url]);
    table.add_row(vec![
        "PM year",
        &config
            .pubmed
            .year
            .map_or_else(|| "current".to_string(), |y| format!("{y:02}")),
    ]);
    table.add_row(vec![
        "PM mirror",
        &config
            .pubmed
            .mirror_dir
            .as_ref()
            .map_or_else(|| "not set".to_string(), |d| d.display().to_string()),
    ]);
    table.add_row(vec!["Connect timeout", &secs(config.http.connect_timeout)]);
    table.add_row(vec!["Read timeout", &secs(config.http.read_timeout)]);
    table.add_row(vec!["Transfer timeout", &secs(config.http.transfer_timeout)]);
    table.add_row(vec![
        "Minimum speed",
        &format!(
            "{} B/s after {}",
            config.http.min_speed,
            secs(config.http.speed_grace)
        ),
    ]);
    table.add_row(vec![
        "Transport retries",
        &config.http.transport_retries.to_string(),
    ]);
    table.add_row(vec![
        "Max attempts",
        &format!(
            "{} (backoff unit {})",
            config.retry.max_attempts,
            secs(config.retry.backoff_secs)
        ),
    ]);

    eprintln!("\n{table}");
}
