//! Streaming one validated archive through decompress → extract → serialize → write

use std::io;
use std::path::Path;
use std::sync::mpsc::sync_channel;

use medtsv_core::{RowSink, StageError, open_gzip_file};

use crate::extract::{ExtractStats, Record, RecordExtractor};
use crate::row;
use crate::target::FetchTarget;

/// Counters for one processed target
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TargetStats {
    pub records: u64,
    pub malformed: u64,
    /// Rows handed to the chunk writer
    pub rows: u64,
}

/// Process a single archive.
///
/// Decompression and extraction run on their own thread and hand records
/// over a bounded channel; this thread serializes them and forwards rows to
/// `sink`. When the sink fails, the channel closes and the extractor stops
/// at its next record. Rows forwarded before a decode error stay in the
/// output.
pub fn process_target(
    target: FetchTarget,
    archive: &Path,
    sink: &mut RowSink,
    capacity: usize,
) -> Result<TargetStats, StageError> {
    let reader = open_gzip_file(archive).map_err(StageError::Decode)?;
    let (tx, rx) = sync_channel::<Record>(capacity.max(1));

    std::thread::scope(|scope| {
        let producer = std::thread::Builder::new()
            .name(format!("extract-{}", target.label()))
            .spawn_scoped(scope, move || -> io::Result<ExtractStats> {
                let mut extractor = RecordExtractor::new(reader, target);
                for record in extractor.by_ref() {
                    // Receiver gone means the consumer failed; it reports why
                    if tx.send(record?).is_err() {
                        break;
                    }
                }
                Ok(extractor.stats())
            })
            .map_err(StageError::Sink)?;

        let mut rows = 0u64;
        let mut sink_error = None;
        for record in rx.iter() {
            if let Err(e) = sink.send(row::serialize(&record)) {
                sink_error = Some(e);
                break;
            }
            rows += 1;
        }
        drop(rx);

        let extracted = producer
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("extractor thread panicked")));
        if let Some(e) = sink_error {
            return Err(StageError::Sink(e));
        }
        let stats = extracted.map_err(StageError::Decode)?;
        Ok(TargetStats {
            records: stats.records,
            malformed: stats.malformed,
            rows,
        })
    })
}
