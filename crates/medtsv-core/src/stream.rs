//! HTTP download with stall detection, gzip validation and streaming gunzip.
//!
//! Uses async reqwest internally with tokio::time::timeout for stall detection,
//! but presents a sync interface so pipeline stages can run on plain threads.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::sync::{LazyLock, OnceLock};
use std::time::{Duration, Instant};

use flate2::read::MultiGzDecoder;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

/// Pause between inner transport retries
const TRANSPORT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Buffer size for the gunzip reader (256KB)
const GZIP_BUF_SIZE: usize = 256 * 1024;

/// Transport settings shared by every download in the process.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// TCP/TLS connect timeout
    pub connect_timeout: Duration,
    /// No bytes for this long = stall
    pub read_timeout: Duration,
    /// Upper bound for one whole transfer
    pub transfer_timeout: Duration,
    /// Minimum throughput in bytes/sec (0 disables the check)
    pub min_speed: u64,
    /// How long throughput may stay below `min_speed` before aborting
    pub speed_grace: Duration,
    /// Immediate re-connects for refused connections and stalls
    pub transport_retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            transfer_timeout: Duration::from_secs(30 * 60),
            min_speed: 1024,
            speed_grace: Duration::from_secs(60),
            transport_retries: 2,
        }
    }
}

static HTTP_CONFIG: OnceLock<HttpConfig> = OnceLock::new();

/// Install the process-wide transport config.
///
/// Must be called before the first download; later calls are ignored.
pub fn set_http_config(config: HttpConfig) {
    if HTTP_CONFIG.set(config).is_err() {
        log::debug!("HTTP config already initialized, ignoring override");
    }
}

/// Current transport config (defaults if never set).
pub fn http_config() -> &'static HttpConfig {
    HTTP_CONFIG.get_or_init(HttpConfig::default)
}

/// Error types for stream operations
#[derive(Debug)]
pub enum StreamError {
    /// HTTP error with optional status code
    Http {
        status: Option<u16>,
        message: String,
    },
    /// Connection could not be established
    Connect(String),
    /// I/O error (including stalls, reported as `TimedOut`)
    Io(io::Error),
    /// The local staging file could not be created or written
    Local(io::Error),
    /// Payload is not a complete gzip container
    Corrupt(String),
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Connect(message) => write!(f, "connect failed: {message}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Local(e) => write!(f, "cannot write staging file: {e}"),
            Self::Corrupt(message) => write!(f, "corrupt payload: {message}"),
        }
    }
}

impl std::error::Error for StreamError {}

impl StreamError {
    /// Create error from reqwest error, keeping connect failures and timeouts apart
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_connect() {
            Self::Connect(e.to_string())
        } else if e.is_timeout() {
            Self::Io(io::Error::new(io::ErrorKind::TimedOut, e.to_string()))
        } else {
            Self::Http {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            }
        }
    }

    /// Whether a fresh attempt (after backoff) can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            // 404 and friends mean the file is not there; asking again won't help
            Self::Http {
                status: Some(s), ..
            } => matches!(*s, 408 | 429 | 500..=599),
            Self::Http { status: None, .. } => true,
            Self::Connect(_) | Self::Corrupt(_) => true,
            Self::Local(_) => false,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::Interrupted
            ),
        }
    }

    /// Faults the transport layer retries on its own: refusals and stalls.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connect(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::ConnectionRefused
            ),
            _ => false,
        }
    }

    /// Local disk failure: later targets would fail the same way.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// Classify an error from copying into the staging file. Running out of
    /// space or a read-only destination is local; anything else is the source.
    pub fn from_copy(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::StorageFull | io::ErrorKind::ReadOnlyFilesystem => Self::Local(e),
            _ => Self::Io(e),
        }
    }
}

impl From<io::Error> for StreamError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(http_config().connect_timeout)
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

/// Get shared HTTP client.
pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Aborts a transfer whose throughput stays under a floor for a whole window.
#[derive(Debug)]
pub struct SpeedGuard {
    min_speed: u64,
    grace: Duration,
    window_start: Instant,
    window_bytes: u64,
}

impl SpeedGuard {
    pub fn new(min_speed: u64, grace: Duration, now: Instant) -> Self {
        Self {
            min_speed,
            grace,
            window_start: now,
            window_bytes: 0,
        }
    }

    /// Account for `bytes` received at `now`.
    pub fn observe(&mut self, now: Instant, bytes: u64) -> io::Result<()> {
        self.window_bytes += bytes;
        if self.min_speed == 0 {
            return Ok(());
        }
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.grace {
            return Ok(());
        }
        let rate = self.window_bytes as f64 / elapsed.as_secs_f64();
        if rate < self.min_speed as f64 {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!(
                    "transfer below {} B/s for {}s ({rate:.0} B/s)",
                    self.min_speed,
                    self.grace.as_secs()
                ),
            ));
        }
        self.window_start = now;
        self.window_bytes = 0;
        Ok(())
    }
}

/// HTTP GET `url` into `dest`, truncating whatever was there.
///
/// Refused connections and stalls are retried in place up to
/// `transport_retries` times; everything else is returned to the caller.
/// Returns the number of bytes written.
pub fn download_to_file(url: &str, dest: &Path) -> Result<u64, StreamError> {
    let cfg = http_config();
    SHARED_RUNTIME.handle().block_on(async {
        let mut retry = 0u32;
        loop {
            let result = tokio::time::timeout(cfg.transfer_timeout, download_once(url, dest, cfg))
                .await
                .unwrap_or_else(|_| {
                    Err(StreamError::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!(
                            "transfer exceeded {}s",
                            cfg.transfer_timeout.as_secs()
                        ),
                    )))
                });
            match result {
                Err(e) if e.is_transient() && retry < cfg.transport_retries => {
                    retry += 1;
                    log::debug!(
                        "{url}: transport retry {retry}/{} after: {e}",
                        cfg.transport_retries
                    );
                    tokio::time::sleep(TRANSPORT_RETRY_DELAY).await;
                }
                other => return other,
            }
        }
    })
}

async fn download_once(url: &str, dest: &Path, cfg: &HttpConfig) -> Result<u64, StreamError> {
    let response = http_client()
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| StreamError::from_reqwest(&e))?;

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(StreamError::Local)?;
    let mut body = response.bytes_stream();
    let mut guard = SpeedGuard::new(cfg.min_speed, cfg.speed_grace, Instant::now());
    let mut total = 0u64;

    loop {
        let chunk = match tokio::time::timeout(cfg.read_timeout, body.next()).await {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(e))) => return Err(StreamError::from_reqwest(&e)),
            Ok(None) => break,
            Err(_) => {
                return Err(StreamError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("read timeout ({}s with no data)", cfg.read_timeout.as_secs()),
                )));
            }
        };
        file.write_all(&chunk).await.map_err(StreamError::Local)?;
        total += chunk.len() as u64;
        guard.observe(Instant::now(), chunk.len() as u64)?;
    }

    file.flush().await.map_err(StreamError::Local)?;
    Ok(total)
}

/// Check that `path` holds a complete gzip stream.
///
/// Decompresses into a null sink, so trailer CRC and length are verified
/// without holding the content in memory. Returns the uncompressed size.
pub fn validate_gzip(path: &Path) -> Result<u64, StreamError> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Err(StreamError::Corrupt("empty payload".to_string()));
    }
    let mut decoder = MultiGzDecoder::new(BufReader::new(file));
    io::copy(&mut decoder, &mut io::sink()).map_err(|e| StreamError::Corrupt(e.to_string()))
}

/// Buffered gunzip over any byte source.
pub type GzipReader<R> = BufReader<MultiGzDecoder<R>>;

/// Wrap `inner` in a streaming gunzip.
///
/// Output becomes available as input arrives. Truncation and corruption
/// surface as `io::Error` from `read`, never as a silent end of stream.
pub fn decompress<R: Read>(inner: R) -> GzipReader<R> {
    BufReader::with_capacity(GZIP_BUF_SIZE, MultiGzDecoder::new(inner))
}

/// Open a staged archive for streaming decompression.
pub fn open_gzip_file(path: &Path) -> io::Result<GzipReader<File>> {
    Ok(decompress(File::open(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::TempDir;

    fn http_err(status: u16) -> StreamError {
        StreamError::Http {
            status: Some(status),
            message: "test".to_string(),
        }
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn http_404_not_retryable() {
        assert!(!http_err(404).is_retryable());
    }

    #[test]
    fn http_403_not_retryable() {
        assert!(!http_err(403).is_retryable());
    }

    #[test]
    fn http_503_retryable() {
        assert!(http_err(503).is_retryable());
    }

    #[test]
    fn http_429_retryable() {
        assert!(http_err(429).is_retryable());
    }

    #[test]
    fn http_none_status_retryable() {
        let err = StreamError::Http {
            status: None,
            message: "body stream closed".to_string(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn connect_is_retryable_and_transient() {
        let err = StreamError::Connect("connection refused".to_string());
        assert!(err.is_retryable());
        assert!(err.is_transient());
    }

    #[test]
    fn corrupt_retryable_but_not_transient() {
        let err = StreamError::Corrupt("bad crc".to_string());
        assert!(err.is_retryable());
        assert!(!err.is_transient());
    }

    #[test]
    fn io_timeout_transient() {
        let err = StreamError::Io(io::Error::new(io::ErrorKind::TimedOut, "stall"));
        assert!(err.is_retryable());
        assert!(err.is_transient());
    }

    #[test]
    fn io_storage_full_not_retryable() {
        let err = StreamError::Io(io::Error::new(io::ErrorKind::StorageFull, "disk full"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn local_errors_fatal_and_final() {
        let err = StreamError::Local(io::Error::new(io::ErrorKind::StorageFull, "disk full"));
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
        assert!(!err.is_transient());
        assert!(!http_err(503).is_fatal());
        assert!(!StreamError::Corrupt("x".to_string()).is_fatal());
    }

    #[test]
    fn copy_errors_classified_by_kind() {
        let full = io::Error::new(io::ErrorKind::StorageFull, "No space left on device");
        assert!(StreamError::from_copy(full).is_fatal());
        let missing = io::Error::new(io::ErrorKind::NotFound, "no such file");
        assert!(matches!(StreamError::from_copy(missing), StreamError::Io(_)));
    }

    #[test]
    fn io_not_found_not_retryable() {
        let err = StreamError::Io(io::Error::new(io::ErrorKind::NotFound, "missing"));
        assert!(!err.is_retryable());
        assert!(!err.is_transient());
    }

    #[test]
    fn http_error_not_transient() {
        assert!(!http_err(500).is_transient());
    }

    #[test]
    fn display_variants() {
        assert_eq!(format!("{}", http_err(404)), "HTTP 404: test");
        assert_eq!(
            format!("{}", StreamError::Connect("refused".to_string())),
            "connect failed: refused"
        );
        assert!(format!("{}", StreamError::Corrupt("x".to_string())).contains("corrupt"));
    }

    #[test]
    fn speed_guard_passes_within_grace() {
        let start = Instant::now();
        let mut guard = SpeedGuard::new(1000, Duration::from_secs(10), start);
        assert!(guard.observe(start + Duration::from_secs(5), 1).is_ok());
    }

    #[test]
    fn speed_guard_trips_after_grace() {
        let start = Instant::now();
        let mut guard = SpeedGuard::new(1000, Duration::from_secs(10), start);
        let err = guard
            .observe(start + Duration::from_secs(11), 100)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn speed_guard_resets_window() {
        let start = Instant::now();
        let mut guard = SpeedGuard::new(1000, Duration::from_secs(10), start);
        assert!(guard
            .observe(start + Duration::from_secs(10), 50_000)
            .is_ok());
        // New window starts at t=10; a slow trickle inside it is still fine
        assert!(guard.observe(start + Duration::from_secs(15), 1).is_ok());
    }

    #[test]
    fn speed_guard_disabled_with_zero() {
        let start = Instant::now();
        let mut guard = SpeedGuard::new(0, Duration::from_secs(1), start);
        assert!(guard.observe(start + Duration::from_secs(100), 0).is_ok());
    }

    #[test]
    fn validate_gzip_accepts_complete_stream() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ok.gz");
        std::fs::write(&path, gzip(b"<PubmedArticleSet/>")).unwrap();
        assert_eq!(validate_gzip(&path).unwrap(), 19);
    }

    #[test]
    fn validate_gzip_rejects_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.gz");
        let data = gzip(&b"abcdefghij".repeat(1000));
        std::fs::write(&path, &data[..data.len() / 2]).unwrap();
        assert!(matches!(validate_gzip(&path), Err(StreamError::Corrupt(_))));
    }

    #[test]
    fn validate_gzip_rejects_plain_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.gz");
        std::fs::write(&path, b"<html>not found</html>").unwrap();
        assert!(matches!(validate_gzip(&path), Err(StreamError::Corrupt(_))));
    }

    #[test]
    fn validate_gzip_rejects_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.gz");
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(validate_gzip(&path), Err(StreamError::Corrupt(_))));
    }

    #[test]
    fn decompress_streams_content() {
        let data = gzip(b"hello world");
        let mut out = String::new();
        decompress(&data[..]).read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn decompress_surfaces_truncation() {
        let data = gzip(&b"0123456789".repeat(5000));
        let mut out = Vec::new();
        let err = decompress(&data[..data.len() - 20])
            .read_to_end(&mut out)
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData
        ));
    }
}
