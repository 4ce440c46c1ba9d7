//! Output sinks: row-bounded TSV chunk files and the channel feeding them
//!
//! Rows are written with the `csv` crate: tab delimiter, every field quoted,
//! embedded quotes doubled, `\n` line terminator.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread::JoinHandle;

use csv::{QuoteStyle, Terminator, WriterBuilder};

use crate::observe::{Event, Observer};

/// Rows per output chunk
pub const DEFAULT_CHUNK_ROWS: u64 = 100_000;

/// Output file extension
pub const CHUNK_EXTENSION: &str = "tsv";

/// Buffer size for chunk writes (1MB)
const WRITE_BUF_SIZE: usize = 1024 * 1024;

/// One output row, field by field
pub type Row = Vec<String>;

/// Shared error flag. The writer thread sets it on failure, `RowSink` checks it before send
pub type ErrorFlag = Arc<AtomicBool>;

/// A closed, complete output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub index: usize,
    pub path: PathBuf,
    pub rows: u64,
}

/// Chunk currently open for writing (under its `.tmp` name)
struct OpenChunk {
    index: usize,
    writer: csv::Writer<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    rows: u64,
}

impl OpenChunk {
    fn create(index: usize, final_path: PathBuf) -> io::Result<Self> {
        let tmp_path = tmp_path_for(&final_path);
        if tmp_path.exists() {
            fs::remove_file(&tmp_path)?;
        }
        let file = File::create(&tmp_path)?;
        Ok(Self {
            index,
            writer: tsv_writer(file),
            tmp_path,
            final_path,
            rows: 0,
        })
    }

    /// Flush and atomically rename tmp → final
    fn finalize(mut self) -> io::Result<OutputChunk> {
        self.writer.flush()?;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| io::Error::new(e.error().kind(), e.to_string()))?;
        file.sync_all()?;
        drop(file);
        fs::rename(&self.tmp_path, &self.final_path)?;
        Ok(OutputChunk {
            index: self.index,
            path: self.final_path,
            rows: self.rows,
        })
    }
}

/// Quoted, tab-delimited writer over one chunk file
fn tsv_writer(file: File) -> csv::Writer<File> {
    WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(QuoteStyle::Always)
        .terminator(Terminator::Any(b'\n'))
        .has_headers(false)
        .flexible(true)
        .buffer_capacity(WRITE_BUF_SIZE)
        .from_writer(file)
}

fn tmp_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Splits a row stream into files of at most `max_rows` rows each.
///
/// Files are named `<prefix>_<index:04>.tsv` with a 0-based index. At most one
/// chunk is open at a time; it becomes visible under its final name only
/// once closed. No file is created before the first row arrives.
pub struct ChunkWriter {
    output_dir: PathBuf,
    prefix: String,
    max_rows: u64,
    current: Option<OpenChunk>,
    next_index: usize,
    closed: Vec<OutputChunk>,
    observer: Arc<dyn Observer>,
}

impl std::fmt::Debug for ChunkWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkWriter")
            .field("output_dir", &self.output_dir)
            .field("prefix", &self.prefix)
            .field("max_rows", &self.max_rows)
            .field("next_index", &self.next_index)
            .finish_non_exhaustive()
    }
}

impl ChunkWriter {
    pub fn new(
        output_dir: &Path,
        prefix: &str,
        max_rows: u64,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            prefix: prefix.to_string(),
            max_rows: max_rows.max(1),
            current: None,
            next_index: 0,
            closed: Vec::new(),
            observer,
        }
    }

    /// Final path of chunk `index`
    pub fn chunk_path(&self, index: usize) -> PathBuf {
        self.output_dir
            .join(format!("{}_{index:04}.{CHUNK_EXTENSION}", self.prefix))
    }

    /// Append one row, rotating chunks as needed.
    pub fn write_row<I, T>(&mut self, fields: I) -> io::Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let needs_new = self
            .current
            .as_ref()
            .map_or(true, |chunk| chunk.rows >= self.max_rows);
        if needs_new {
            self.close_current()?;
            self.open_next()?;
        }
        if let Some(chunk) = self.current.as_mut() {
            chunk.writer.write_record(fields)?;
            chunk.rows += 1;
        }
        Ok(())
    }

    /// Close the open chunk (whatever its row count) and return every closed chunk.
    pub fn finish(mut self) -> io::Result<Vec<OutputChunk>> {
        self.close_current()?;
        Ok(self.closed)
    }

    fn open_next(&mut self) -> io::Result<()> {
        let index = self.next_index;
        let chunk = OpenChunk::create(index, self.chunk_path(index))?;
        self.next_index += 1;
        self.observer.event(&Event::ChunkOpened {
            index,
            path: &chunk.final_path,
        });
        self.current = Some(chunk);
        Ok(())
    }

    fn close_current(&mut self) -> io::Result<()> {
        if let Some(chunk) = self.current.take() {
            let closed = chunk.finalize()?;
            self.observer.event(&Event::ChunkClosed {
                index: closed.index,
                path: &closed.path,
                rows: closed.rows,
            });
            self.closed.push(closed);
        }
        Ok(())
    }
}

/// Sending half of the row channel feeding a [`ChunkWriter`] thread
#[derive(Debug)]
pub struct RowSink {
    sender: SyncSender<Row>,
    error_flag: ErrorFlag,
    rows: u64,
}

impl RowSink {
    pub fn send(&mut self, row: Row) -> io::Result<()> {
        // Fast-fail: writer already errored
        if self.error_flag.load(Ordering::Relaxed) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "chunk writer failed",
            ));
        }
        self.sender
            .send(row)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "row channel closed"))?;
        self.rows += 1;
        Ok(())
    }

    /// Rows handed to the writer so far
    pub fn rows(&self) -> u64 {
        self.rows
    }
}

/// Run `writer` on a dedicated thread fed by a bounded channel.
///
/// The thread ends when every [`RowSink`] is dropped, closing the last
/// chunk. On a write error it sets the shared flag and returns, which drops
/// the receiver so senders fail promptly.
pub fn spawn_chunk_writer(
    writer: ChunkWriter,
    capacity: usize,
) -> io::Result<(RowSink, JoinHandle<io::Result<Vec<OutputChunk>>>)> {
    let (sender, rx) = sync_channel(capacity);
    let error_flag = ErrorFlag::default();
    let thread_flag = error_flag.clone();
    let handle = std::thread::Builder::new()
        .name("chunk-writer".to_string())
        .spawn(move || writer_loop(writer, rx, thread_flag))?;
    Ok((
        RowSink {
            sender,
            error_flag,
            rows: 0,
        },
        handle,
    ))
}

fn writer_loop(
    mut writer: ChunkWriter,
    rx: Receiver<Row>,
    error_flag: ErrorFlag,
) -> io::Result<Vec<OutputChunk>> {
    for row in rx.iter() {
        if let Err(e) = writer.write_row(&row) {
            error_flag.store(true, Ordering::Relaxed);
            return Err(e);
        }
    }
    writer.finish().inspect_err(|_| error_flag.store(true, Ordering::Relaxed))
}

/// Remove stale .tmp files in the output directory
pub fn cleanup_tmp_files(output_dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(output_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "tmp") {
            log::warn!("Removing stale tmp file: {}", path.display());
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
