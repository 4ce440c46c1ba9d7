//! Fetching baseline archives with bounded retries
//!
//! Every attempt downloads into a fresh staging file next to the output and
//! validates it as a complete gzip container before anything downstream
//! reads it. Partial data from a failed attempt never leaks into the next.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use medtsv_core::{Observer, RetryPolicy, StreamError, download_to_file, retry_with_backoff};

use crate::target::FetchTarget;

/// Where archives come from.
pub trait Source: Send + Sync {
    /// Write the complete archive for `target` to `dest`, returning its size.
    /// `dest` may already exist and must be overwritten. Failures to write
    /// `dest` itself are reported as [`StreamError::Local`].
    fn download(&self, target: &FetchTarget, dest: &Path) -> Result<u64, StreamError>;

    /// Human-readable location, for logs
    fn describe(&self, target: &FetchTarget) -> String;
}

/// NCBI (or any HTTP mirror) directory listing baseline files
#[derive(Debug, Clone)]
pub struct HttpSource {
    base_url: String,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Source for HttpSource {
    fn download(&self, target: &FetchTarget, dest: &Path) -> Result<u64, StreamError> {
        download_to_file(&target.url(&self.base_url), dest)
    }

    fn describe(&self, target: &FetchTarget) -> String {
        target.url(&self.base_url)
    }
}

/// Local directory holding already-downloaded baseline files
#[derive(Debug, Clone)]
pub struct DirSource {
    dir: PathBuf,
}

impl DirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Source for DirSource {
    fn download(&self, target: &FetchTarget, dest: &Path) -> Result<u64, StreamError> {
        let mut src = fs::File::open(self.dir.join(target.filename()))?;
        let mut staged = fs::File::create(dest).map_err(StreamError::Local)?;
        let bytes = io::copy(&mut src, &mut staged).map_err(StreamError::from_copy)?;
        staged.sync_all().map_err(StreamError::Local)?;
        Ok(bytes)
    }

    fn describe(&self, target: &FetchTarget) -> String {
        self.dir.join(target.filename()).display().to_string()
    }
}

/// A validated archive on local disk. The staged file is removed on drop.
#[derive(Debug)]
pub struct Download {
    pub path: PathBuf,
    pub bytes: u64,
    pub attempts: u32,
}

impl Drop for Download {
    fn drop(&mut self) {
        if let Err(e) = remove_staged(&self.path) {
            log::warn!("Failed to remove {}: {e}", self.path.display());
        }
    }
}

/// All attempts for a target failed
#[derive(Debug)]
pub struct FetchFailure {
    pub error: StreamError,
    pub attempts: u32,
}

impl FetchFailure {
    /// Staging failed on local disk, so the whole run should stop
    pub fn is_fatal(&self) -> bool {
        self.error.is_fatal()
    }
}

/// Remove a staged file, ignoring one that is already gone.
fn remove_staged(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Fetches targets from a [`Source`] into a staging directory.
pub struct Fetcher<'a> {
    source: &'a dyn Source,
    policy: RetryPolicy,
    staging_dir: PathBuf,
    observer: &'a dyn Observer,
}

impl<'a> Fetcher<'a> {
    pub fn new(
        source: &'a dyn Source,
        policy: RetryPolicy,
        staging_dir: impl Into<PathBuf>,
        observer: &'a dyn Observer,
    ) -> Self {
        Self {
            source,
            policy,
            staging_dir: staging_dir.into(),
            observer,
        }
    }

    /// Staging location for a target
    pub fn staging_path(&self, target: &FetchTarget) -> PathBuf {
        self.staging_dir.join(format!("{}.tmp", target.filename()))
    }

    /// Fetch one target, trying at most `max_attempts` times.
    pub fn fetch(&self, target: &FetchTarget) -> Result<Download, FetchFailure> {
        let label = target.label();
        let staged = self.staging_path(target);
        log::debug!("{label}: fetching {}", self.source.describe(target));

        let outcome = retry_with_backoff(&label, &self.policy, self.observer, |_| {
            self.attempt(target, &staged)
        });

        match outcome.result {
            Ok(bytes) => Ok(Download {
                path: staged,
                bytes,
                attempts: outcome.attempts,
            }),
            Err(error) => {
                if let Err(e) = remove_staged(&staged) {
                    log::warn!("Failed to remove {}: {e}", staged.display());
                }
                Err(FetchFailure {
                    error,
                    attempts: outcome.attempts,
                })
            }
        }
    }

    fn attempt(&self, target: &FetchTarget, staged: &Path) -> Result<u64, StreamError> {
        remove_staged(staged).map_err(StreamError::Local)?;
        let bytes = self.source.download(target, staged)?;
        medtsv_core::validate_gzip(staged)?;
        log::debug!("{}: {bytes} bytes staged", target.label());
        Ok(bytes)
    }
}
