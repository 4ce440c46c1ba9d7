//! PubMed pipeline configuration

use std::path::PathBuf;

use anyhow::{Result, bail};
use medtsv_core::{DEFAULT_CHUNK_ROWS, RetryPolicy};

use crate::target::{FetchTarget, targets};

/// Default NCBI baseline directory
pub const DEFAULT_BASE_URL: &str = "https://ftp.ncbi.nlm.nih.gov/pubmed/baseline/";

/// Runtime configuration for the PubMed pipeline
#[derive(Debug, Clone)]
pub struct Config {
    /// Output directory for TSV chunks (also stages downloads)
    pub output_dir: PathBuf,
    /// Two-digit baseline year, e.g. 25 for `pubmed25n*.xml.gz`
    pub year_tag: u16,
    /// First sequence number (inclusive)
    pub first: u32,
    /// Last sequence number (inclusive)
    pub last: u32,
    /// Base URL for the baseline directory
    pub base_url: String,
    /// Read archives from this directory instead of the network
    pub mirror_dir: Option<PathBuf>,
    /// Rows per output chunk
    pub chunk_rows: u64,
    /// Chunk file name prefix
    pub chunk_prefix: String,
    /// Fetch attempts and backoff
    pub retry: RetryPolicy,
    /// Capacity of the bounded channels between stages
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            year_tag: 25,
            first: 1,
            last: 1,
            base_url: DEFAULT_BASE_URL.to_string(),
            mirror_dir: None,
            chunk_rows: DEFAULT_CHUNK_ROWS,
            chunk_prefix: "pubmed".to_string(),
            retry: RetryPolicy::default(),
            channel_capacity: 1024,
        }
    }
}

impl Config {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.first > self.last {
            bail!(
                "empty range: first ({}) is greater than last ({})",
                self.first,
                self.last
            );
        }
        if self.chunk_rows == 0 {
            bail!("chunk_rows must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.channel_capacity == 0 {
            bail!("channel_capacity must be at least 1");
        }
        Ok(())
    }

    /// Fetch targets in processing order
    pub fn targets(&self) -> Vec<FetchTarget> {
        targets(self.year_tag, self.first..=self.last)
    }
}
