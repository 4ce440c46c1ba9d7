//! End-to-end tests for medtsv-pubmed
//!
//! Offline tests drive the runner with an in-memory archive source.
//! Network tests are marked #[ignore].
//! Run with: cargo test -p medtsv-pubmed --test pipeline -- --ignored

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use medtsv_core::{Event, NullObserver, Observer, RetryPolicy, StreamError};
use medtsv_pubmed::{Config, FetchStatus, FetchTarget, Source, run_with};
use tempfile::TempDir;

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

fn archive(titles: &[&str]) -> Vec<u8> {
    let body: String = titles
        .iter()
        .enumerate()
        .map(|(i, title)| {
            format!(
                "<PubmedArticle><MedlineCitation><PMID>{}</PMID><Article>\
                 <Journal><JournalIssue><PubDate><Year>2020</Year></PubDate></JournalIssue></Journal>\
                 <ArticleTitle>{title}</ArticleTitle>\
                 <AuthorList><Author><LastName>Smith</LastName></Author>\
                 <Author><LastName>Lee</LastName></Author></AuthorList>\
                 </Article></MedlineCitation></PubmedArticle>",
                i + 1
            )
        })
        .collect();
    gzip(format!("<?xml version=\"1.0\"?><PubmedArticleSet>{body}</PubmedArticleSet>").as_bytes())
}

/// Serves archives by sequence number; any other sequence is unreachable.
#[derive(Default)]
struct MemorySource {
    archives: HashMap<u32, Vec<u8>>,
    /// Sequences whose staging write hits a full disk
    disk_full: Vec<u32>,
    calls: AtomicU32,
}

impl Source for MemorySource {
    fn download(&self, target: &FetchTarget, dest: &Path) -> Result<u64, StreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.disk_full.contains(&target.sequence) {
            return Err(StreamError::Local(io::Error::new(
                io::ErrorKind::StorageFull,
                "No space left on device",
            )));
        }
        match self.archives.get(&target.sequence) {
            Some(bytes) => {
                fs::write(dest, bytes)?;
                Ok(bytes.len() as u64)
            }
            None => Err(StreamError::Connect("connection refused".to_string())),
        }
    }

    fn describe(&self, target: &FetchTarget) -> String {
        format!("memory://{}", target.filename())
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl Observer for Recorder {
    fn event(&self, event: &Event<'_>) {
        if let Event::AttemptStarted { label, attempt, .. } = event {
            self.0.lock().unwrap().push(format!("{label}#{attempt}"));
        }
    }
}

fn config(output: &Path, first: u32, last: u32) -> Config {
    Config {
        output_dir: output.to_path_buf(),
        year_tag: 25,
        first,
        last,
        retry: RetryPolicy {
            max_attempts: 3,
            backoff_unit: Duration::ZERO,
        },
        ..Default::default()
    }
}

fn tsv_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == "tsv"))
        .collect();
    files.sort();
    files
}

fn line_count(path: &Path) -> usize {
    fs::read_to_string(path).unwrap().lines().count()
}

#[test]
fn one_target_fails_run_still_succeeds() {
    let output = TempDir::new().unwrap();
    let mut source = MemorySource::default();
    source.archives.insert(1, archive(&["Alpha", "Beta", "Gamma"]));
    let recorder = Arc::new(Recorder::default());

    let summary = run_with(&config(output.path(), 1, 2), &source, recorder.clone()).unwrap();

    // Ledger holds only the failed target
    assert_eq!(summary.ledger.len(), 1);
    assert_eq!(summary.ledger.filenames(), vec!["pubmed25n0002.xml.gz"]);
    assert_eq!(summary.ledger.entries()[0].attempts, 3);
    assert_eq!(summary.outcomes.len(), 2);
    assert_eq!(summary.outcomes[0].status, FetchStatus::Succeeded);
    assert_eq!(summary.completed(), 1);

    // Exactly max_attempts attempts for the failing target
    let attempts = recorder.0.lock().unwrap().clone();
    assert_eq!(attempts, vec!["25n0001#1", "25n0002#1", "25n0002#2", "25n0002#3"]);
    assert_eq!(source.calls.load(Ordering::SeqCst), 4);

    let files = tsv_files(output.path());
    assert_eq!(files.len(), 1);
    assert!(files[0].ends_with("pubmed_0000.tsv"));

    let content = fs::read_to_string(&files[0]).unwrap();
    let rows: Vec<&str> = content.lines().collect();
    assert_eq!(rows.len(), 3);
    assert_eq!(
        rows[0],
        "\"25n0001_000001\"\t\"Smith,Lee\"\t\"2020\"\t\"Alpha\"\t\"\""
    );
    assert!(rows[2].starts_with("\"25n0001_000003\""));

    // No staging leftovers
    let leftovers: Vec<_> = fs::read_dir(output.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == "tmp"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn rows_split_across_chunks_in_order() {
    let output = TempDir::new().unwrap();
    let mut source = MemorySource::default();
    source.archives.insert(1, archive(&["a", "b", "c", "d"]));
    source.archives.insert(2, archive(&["e", "f", "g"]));

    let mut cfg = config(output.path(), 1, 2);
    cfg.chunk_rows = 3;
    let summary = run_with(&cfg, &source, Arc::new(NullObserver)).unwrap();

    assert_eq!(summary.rows, 7);
    assert_eq!(summary.chunks.len(), 3);
    let files = tsv_files(output.path());
    let counts: Vec<usize> = files.iter().map(|p| line_count(p)).collect();
    assert_eq!(counts, vec![3, 3, 1]);

    let ids: Vec<String> = files
        .iter()
        .flat_map(|p| {
            fs::read_to_string(p)
                .unwrap()
                .lines()
                .map(|l| l.split('\t').next().unwrap().to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    assert_eq!(
        ids,
        vec![
            "\"25n0001_000001\"",
            "\"25n0001_000002\"",
            "\"25n0001_000003\"",
            "\"25n0001_000004\"",
            "\"25n0002_000001\"",
            "\"25n0002_000002\"",
            "\"25n0002_000003\"",
        ]
    );
}

#[test]
fn all_targets_failing_leaves_no_chunks() {
    let output = TempDir::new().unwrap();
    let source = MemorySource::default();

    let summary = run_with(&config(output.path(), 3, 4), &source, Arc::new(NullObserver)).unwrap();
    assert_eq!(summary.failed(), 2);
    assert!(summary.chunks.is_empty());
    assert!(tsv_files(output.path()).is_empty());
}

#[test]
fn corrupt_archive_is_not_fatal() {
    let output = TempDir::new().unwrap();
    let mut source = MemorySource::default();
    source.archives.insert(1, b"definitely not gzip".to_vec());
    source.archives.insert(2, archive(&["ok"]));

    let summary = run_with(&config(output.path(), 1, 2), &source, Arc::new(NullObserver)).unwrap();
    assert_eq!(summary.ledger.filenames(), vec!["pubmed25n0001.xml.gz"]);
    assert_eq!(summary.rows, 1);
}

#[test]
fn unwritable_output_is_fatal() {
    let output = TempDir::new().unwrap();
    let mut source = MemorySource::default();
    source.archives.insert(1, archive(&["a", "b"]));

    let mut cfg = config(output.path(), 1, 1);
    // Chunks go into a subdirectory nobody created
    cfg.chunk_prefix = "missing/sub/pubmed".to_string();
    let err = run_with(&cfg, &source, Arc::new(NullObserver)).unwrap_err();
    assert!(format!("{err:#}").contains("output"), "{err:#}");
}

#[test]
fn disk_full_while_staging_aborts_run() {
    let output = TempDir::new().unwrap();
    let mut source = MemorySource::default();
    source.archives.insert(2, archive(&["never reached"]));
    source.disk_full.push(1);

    let err = run_with(&config(output.path(), 1, 2), &source, Arc::new(NullObserver)).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("pubmed25n0001.xml.gz"), "{message}");
    assert!(message.contains("No space left"), "{message}");

    // No retries, and target 2 is never attempted
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    assert!(tsv_files(output.path()).is_empty());
}

#[test]
fn stale_tmp_files_cleaned() {
    let output = TempDir::new().unwrap();
    fs::write(output.path().join("pubmed_0000.tsv.tmp"), "half a row").unwrap();
    let mut source = MemorySource::default();
    source.archives.insert(1, archive(&["a"]));

    run_with(&config(output.path(), 1, 1), &source, Arc::new(NullObserver)).unwrap();
    assert_eq!(
        fs::read_to_string(output.path().join("pubmed_0000.tsv"))
            .unwrap()
            .lines()
            .count(),
        1
    );
    assert!(!output.path().join("pubmed_0000.tsv.tmp").exists());
}

#[test]
fn inverted_range_rejected() {
    let output = TempDir::new().unwrap();
    let source = MemorySource::default();
    assert!(run_with(&config(output.path(), 5, 2), &source, Arc::new(NullObserver)).is_err());
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
}

/// Fetch and convert one real baseline file
/// Run with: cargo test -p medtsv-pubmed --test pipeline -- --ignored fetch_single_file
#[test]
#[ignore]
fn fetch_single_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = Config {
        output_dir: temp_dir.path().to_path_buf(),
        year_tag: 25,
        first: 1,
        last: 1,
        ..Default::default()
    };

    let summary = medtsv_pubmed::run(&config, &medtsv_core::ProgressContext::new())
        .expect("Pipeline should succeed");

    assert_eq!(summary.failed(), 0);
    // Each baseline file has ~30,000 articles
    assert!(
        summary.records >= 25_000,
        "Expected at least 25,000 records, got {}",
        summary.records
    );
    assert_eq!(tsv_files(temp_dir.path()).len(), 1);
}
