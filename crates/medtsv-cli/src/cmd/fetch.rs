//! Fetch subcommand - convert a range of PubMed baseline files to TSV

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use chrono::Datelike;
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use medtsv_core::{INTERRUPTED_EXIT_CODE, SharedProgress, fmt_num};
use medtsv_pubmed::Summary;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// First baseline sequence number (inclusive)
    #[arg(long, default_value_t = 1)]
    pub from: u32,

    /// Last baseline sequence number (inclusive)
    #[arg(long)]
    pub to: u32,

    /// Two-digit baseline year, e.g. 25 for pubmed25n*.xml.gz
    #[arg(short, long)]
    pub year: Option<u16>,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Read archives from this directory instead of NCBI
    #[arg(long)]
    pub mirror: Option<PathBuf>,

    /// Rows per output chunk
    #[arg(long)]
    pub chunk_rows: Option<u64>,
}

/// Two-digit tag of the current year
fn current_year_tag() -> u16 {
    chrono::Utc::now().year().rem_euclid(100) as u16
}

/// Print a key-value summary table on stderr
fn print_summary(title: &str, rows: &[(&str, String)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(title).fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    for (label, value) in rows {
        table.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    eprintln!("\n{table}");
}

fn print_failures(summary: &Summary) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Failed target").fg(Color::Red),
            Cell::new("Attempts").fg(Color::Red),
            Cell::new("Last error").fg(Color::Red),
        ]);
    for entry in summary.ledger.entries() {
        table.add_row(vec![
            Cell::new(entry.target.filename()),
            Cell::new(entry.attempts),
            Cell::new(entry.last_error.as_deref().unwrap_or("")),
        ]);
    }
    eprintln!("{table}");
}

pub fn run(args: FetchArgs, config: &Config, progress: &SharedProgress) -> Result<ExitCode> {
    let output_dir = args
        .output
        .unwrap_or_else(|| config.output.default_dir.clone());
    let year_tag = args
        .year
        .or(config.pubmed.year)
        .unwrap_or_else(current_year_tag);

    let pm_config = medtsv_pubmed::Config {
        output_dir: output_dir.clone(),
        year_tag,
        first: args.from,
        last: args.to,
        base_url: config.pubmed.base_url.clone(),
        mirror_dir: args.mirror.or_else(|| config.pubmed.mirror_dir.clone()),
        chunk_rows: args.chunk_rows.unwrap_or(config.output.chunk_rows),
        chunk_prefix: config.output.chunk_prefix.clone(),
        retry: config.retry.policy(),
        channel_capacity: config.output.channel_capacity,
    };

    log::info!("Fetching PubMed baseline");
    log::info!(
        "  Files: pubmed{year_tag:02}n{:04} .. pubmed{year_tag:02}n{:04}",
        pm_config.first,
        pm_config.last
    );
    match &pm_config.mirror_dir {
        Some(dir) => log::info!("  Source: {}", dir.display()),
        None => log::info!("  Source: {}", pm_config.base_url),
    }
    log::info!("  Output: {}", output_dir.display());

    let summary = medtsv_pubmed::run(&pm_config, progress)?;

    print_summary(
        "PubMed",
        &[
            (
                "Files",
                format!(
                    "{}/{} ({} failed)",
                    summary.completed(),
                    summary.outcomes.len(),
                    summary.failed()
                ),
            ),
            ("Records", fmt_num(summary.records as usize)),
            ("Malformed", fmt_num(summary.malformed as usize)),
            (
                "Chunks",
                format!("{} ({} rows)", summary.chunks.len(), fmt_num(summary.rows as usize)),
            ),
            ("Output", output_dir.display().to_string()),
            ("Time", format!("{:.1}s", summary.elapsed.as_secs_f64())),
        ],
    );
    if summary.failed() > 0 {
        print_failures(&summary);
    }

    if summary.interrupted {
        log::warn!("Interrupted before all files were processed");
        return Ok(ExitCode::from(INTERRUPTED_EXIT_CODE));
    }
    // Per-file failures are reported above but do not fail the run
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_tag_two_digits() {
        assert!(current_year_tag() < 100);
    }
}
