//! medtsv PubMed - PubMed baseline to TSV pipeline
//!
//! Fetches a range of baseline archives, streams each through gzip
//! decompression and XML record extraction, and writes one quoted TSV row
//! per record into fixed-size chunk files.
//!
//! # Example
//!
//! ```ignore
//! use medtsv_core::ProgressContext;
//! use medtsv_pubmed::{Config, run};
//!
//! let config = Config {
//!     output_dir: "output".into(),
//!     year_tag: 25,
//!     first: 1,
//!     last: 3,
//!     ..Default::default()
//! };
//!
//! let summary = run(&config, &ProgressContext::new())?;
//! println!("Wrote {} rows", summary.rows);
//! ```

pub mod config;
pub mod extract;
pub mod fetch;
pub mod ledger;
pub mod row;
pub mod runner;
pub mod target;
pub mod worker;

// Re-exports
pub use config::{Config, DEFAULT_BASE_URL};
pub use extract::{ExtractStats, Record, RecordExtractor, RecordId};
pub use fetch::{DirSource, Download, FetchFailure, Fetcher, HttpSource, Source};
pub use ledger::{FetchOutcome, FetchStatus, Ledger};
pub use runner::{Summary, run, run_with};
pub use target::{FetchTarget, targets};
pub use worker::{TargetStats, process_target};
