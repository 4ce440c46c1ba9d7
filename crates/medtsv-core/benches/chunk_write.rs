use std::sync::Arc;

use medtsv_core::{ChunkWriter, NullObserver, Row, spawn_chunk_writer};

fn synthetic_rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| {
            vec![
                format!("25n0001_{i:06}"),
                "Smith,Lee".to_string(),
                "2020".to_string(),
                format!("Title for record \"{i}\""),
                String::new(),
            ]
        })
        .collect()
}

#[divan::bench(args = [1_000, 10_000, 100_000])]
fn chunk_write_direct(bencher: divan::Bencher, max_rows: u64) {
    let rows = synthetic_rows(50_000);
    let dir = tempfile::tempdir().unwrap();
    bencher.bench(|| {
        let mut writer = ChunkWriter::new(dir.path(), "bench", max_rows, Arc::new(NullObserver));
        for row in &rows {
            writer.write_row(row).unwrap();
        }
        writer.finish().unwrap()
    });
}

#[divan::bench(args = [16, 1024])]
fn chunk_write_threaded(bencher: divan::Bencher, capacity: usize) {
    let rows = synthetic_rows(50_000);
    let dir = tempfile::tempdir().unwrap();
    bencher.bench(|| {
        let writer = ChunkWriter::new(dir.path(), "bench", 100_000, Arc::new(NullObserver));
        let (mut sink, handle) = spawn_chunk_writer(writer, capacity).unwrap();
        for row in &rows {
            sink.send(row.clone()).unwrap();
        }
        drop(sink);
        handle.join().unwrap().unwrap()
    });
}

fn main() {
    divan::main();
}
