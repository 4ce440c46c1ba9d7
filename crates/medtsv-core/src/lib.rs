//! medtsv core - streaming building blocks for archive-to-TSV pipelines
//!
//! Fetching with bounded retries, gzip validation and streaming
//! decompression, row-bounded output chunks, and the diagnostics plumbing
//! shared by every stage.

pub mod error;
pub mod logging;
pub mod observe;
pub mod progress;
pub mod retry;
pub mod shutdown;
pub mod sink;
pub mod stream;

// Re-exports for convenience
pub use error::StageError;
pub use logging::{IndicatifLogger, init_logging};
pub use observe::{Event, LogObserver, NullObserver, Observer};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use retry::{Attempted, RetryPolicy, backoff_duration, retry_with_backoff};
pub use shutdown::{
    INTERRUPTED_EXIT_CODE, install_signal_handlers, is_shutdown_requested, request_shutdown,
};
pub use sink::{
    CHUNK_EXTENSION, ChunkWriter, DEFAULT_CHUNK_ROWS, ErrorFlag, OutputChunk, Row, RowSink,
    cleanup_tmp_files, spawn_chunk_writer,
};
pub use stream::{
    GzipReader, HttpConfig, SHARED_RUNTIME, SpeedGuard, StreamError, decompress,
    download_to_file, http_client, http_config, open_gzip_file, set_http_config, validate_gzip,
};
