//! Main runner for the PubMed pipeline

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use medtsv_core::{
    ChunkWriter, Event, LogObserver, Observer, OutputChunk, ProgressContext, cleanup_tmp_files,
    fmt_num, is_shutdown_requested, spawn_chunk_writer,
};

use crate::config::Config;
use crate::fetch::{DirSource, Fetcher, HttpSource, Source};
use crate::ledger::{FetchOutcome, Ledger};
use crate::worker::process_target;

/// Pipeline execution summary
#[derive(Debug)]
pub struct Summary {
    /// One outcome per attempted target, in processing order
    pub outcomes: Vec<FetchOutcome>,
    pub ledger: Ledger,
    pub records: u64,
    pub malformed: u64,
    pub rows: u64,
    pub chunks: Vec<OutputChunk>,
    pub elapsed: Duration,
    /// Shutdown was requested before every target was processed
    pub interrupted: bool,
}

impl Summary {
    pub fn completed(&self) -> usize {
        self.outcomes.len() - self.ledger.len()
    }

    pub fn failed(&self) -> usize {
        self.ledger.len()
    }

    fn log(&self) {
        log::info!("=== PubMed Pipeline Summary ===");
        log::info!(
            "Targets: {}/{} completed ({} failed)",
            self.completed(),
            self.outcomes.len(),
            self.failed()
        );
        log::info!(
            "Records: {} ({} malformed skipped)",
            fmt_num(self.records as usize),
            fmt_num(self.malformed as usize)
        );
        log::info!("Chunks: {} ({} rows)", self.chunks.len(), fmt_num(self.rows as usize));
        log::info!("Time: {:.1}s", self.elapsed.as_secs_f64());

        if self.rows > 0 {
            let rate = self.rows as f64 / self.elapsed.as_secs_f64().max(f64::EPSILON);
            log::info!("Throughput: {rate:.0} rows/sec");
        }
        if !self.ledger.is_empty() {
            log::warn!("Failed targets: {}", self.ledger.filenames().join(", "));
        }
    }
}

/// Run the PubMed pipeline against NCBI (or the configured mirror directory)
pub fn run(config: &Config, progress: &ProgressContext) -> Result<Summary> {
    let source: Box<dyn Source> = match &config.mirror_dir {
        Some(dir) => Box::new(DirSource::new(dir)),
        None => Box::new(HttpSource::new(&config.base_url)),
    };
    let pb = progress.stage_line("pubmed");
    let observer: Arc<dyn Observer> = Arc::new(LogObserver::new(pb.clone()));
    let result = run_with(config, source.as_ref(), observer);
    pb.finish_and_clear();
    result
}

/// Run the pipeline with an explicit archive source and observer.
///
/// Targets are processed strictly in order. A target that cannot be fetched
/// or decoded is recorded in the ledger and skipped. A local disk failure
/// (staging a download or writing a chunk) ends the run with an error,
/// leaving already-closed chunks in place.
pub fn run_with(
    config: &Config,
    source: &dyn Source,
    observer: Arc<dyn Observer>,
) -> Result<Summary> {
    let start = Instant::now();
    config.validate()?;

    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            config.output_dir.display()
        )
    })?;
    cleanup_tmp_files(&config.output_dir).context("Failed to clean output directory")?;

    let writer = ChunkWriter::new(
        &config.output_dir,
        &config.chunk_prefix,
        config.chunk_rows,
        observer.clone(),
    );
    let (mut sink, writer_handle) =
        spawn_chunk_writer(writer, config.channel_capacity).context("Failed to start writer")?;
    let fetcher = Fetcher::new(source, config.retry, &config.output_dir, observer.as_ref());

    let targets = config.targets();
    log::info!(
        "Processing {} target(s): {} .. {}",
        targets.len(),
        targets.first().map(|t| t.filename()).unwrap_or_default(),
        targets.last().map(|t| t.filename()).unwrap_or_default()
    );

    let mut outcomes = Vec::with_capacity(targets.len());
    let mut ledger = Ledger::new();
    let mut records = 0u64;
    let mut malformed = 0u64;
    let mut interrupted = false;
    let mut fatal: Option<anyhow::Error> = None;

    for &target in &targets {
        if is_shutdown_requested() {
            log::warn!("Shutdown requested, skipping remaining targets");
            interrupted = true;
            break;
        }
        let label = target.label();

        let outcome = match fetcher.fetch(&target) {
            Err(failure) if failure.is_fatal() => {
                fatal = Some(
                    anyhow::Error::new(failure.error)
                        .context(format!("{}: cannot stage download", target.filename())),
                );
                break;
            }
            Err(failure) => FetchOutcome::failed(target, failure.attempts, &failure.error),
            Ok(download) => {
                match process_target(target, &download.path, &mut sink, config.channel_capacity) {
                    Ok(stats) => {
                        records += stats.records;
                        malformed += stats.malformed;
                        observer.event(&Event::TargetCompleted {
                            label: &label,
                            records: stats.records,
                            malformed: stats.malformed,
                        });
                        FetchOutcome::succeeded(target, download.attempts)
                    }
                    Err(e) if e.is_fatal() => {
                        fatal = Some(
                            anyhow::Error::new(e)
                                .context(format!("{}: cannot write output", target.filename())),
                        );
                        break;
                    }
                    Err(e) => {
                        log::warn!("{label}: {e}");
                        FetchOutcome::failed(target, download.attempts, &e)
                    }
                }
            }
        };
        ledger.record(&outcome);
        outcomes.push(outcome);
    }

    let rows = sink.rows();
    drop(sink);
    let chunks = match writer_handle.join() {
        Ok(Ok(chunks)) => chunks,
        // The writer's own error is the root cause of any send failure above
        Ok(Err(e)) => {
            fatal = Some(anyhow::Error::new(e).context("Failed to write output chunk"));
            Vec::new()
        }
        Err(_) => {
            fatal = Some(anyhow::anyhow!("chunk writer thread panicked"));
            Vec::new()
        }
    };

    let summary = Summary {
        outcomes,
        ledger,
        records,
        malformed,
        rows,
        chunks,
        elapsed: start.elapsed(),
        interrupted,
    };
    summary.log();

    match fatal {
        Some(e) => Err(e),
        None => Ok(summary),
    }
}
