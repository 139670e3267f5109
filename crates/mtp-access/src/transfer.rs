//! Chunked streaming between a reader and a writer, with progress reporting.
//!
//! Used by every backend whose native API is stream-shaped (mount files, COM `IStream`s, the
//! in-memory store). The protocol backend collects chunks with [`read_chunks`] instead, since
//! mtp-rs wants the whole upload as a stream up front.

use std::io::{ErrorKind, Read, Write};

/// Progress callback for transfers.
/// Called after each chunk with (bytes_transferred_so_far, total_bytes).
///
/// Protocol-backend uploads hand the whole object to the device in one call, so they report
/// `(0, total)` before sending and `(total, total)` once the device accepted it. Every transfer
/// that succeeds ends with a `(total, total)` report.
pub type ProgressFn<'a> = &'a dyn Fn(u64, u64);

/// Copies `source` into `sink` in `block_size` chunks until EOF.
///
/// `total` is only passed through to the progress callback. Returns the number of bytes copied.
pub(crate) fn copy_chunked(
    source: &mut dyn Read,
    sink: &mut dyn Write,
    block_size: usize,
    total: u64,
    progress: Option<ProgressFn<'_>>,
) -> std::io::Result<u64> {
    let mut buffer = vec![0u8; block_size.max(1)];
    let mut copied = 0u64;

    loop {
        let bytes_read = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        sink.write_all(&buffer[..bytes_read])?;
        copied += bytes_read as u64;

        if let Some(cb) = progress {
            cb(copied, total);
        }
    }

    sink.flush()?;
    Ok(copied)
}

/// Reads exactly `size` bytes from `source` as a list of chunks of at most `block_size` bytes.
///
/// Fails with `UnexpectedEof` if the source ends early.
#[cfg_attr(not(any(target_os = "macos", target_os = "linux")), allow(dead_code))]
pub(crate) fn read_chunks(source: &mut dyn Read, size: u64, block_size: usize) -> std::io::Result<Vec<Vec<u8>>> {
    let block_size = block_size.max(1);
    let mut chunks = Vec::new();
    let mut remaining = size;

    while remaining > 0 {
        let want = remaining.min(block_size as u64) as usize;
        let mut chunk = vec![0u8; want];
        source.read_exact(&mut chunk).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("source ended after {} of {} bytes", size - remaining, size),
                )
            } else {
                e
            }
        })?;
        remaining -= want as u64;
        chunks.push(chunk);
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::io::Cursor;

    #[test]
    fn test_copy_chunked_copies_everything() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut sink = Vec::new();

        let copied = copy_chunked(&mut Cursor::new(&data), &mut sink, 1024, data.len() as u64, None).unwrap();

        assert_eq!(copied, 10_000);
        assert_eq!(sink, data);
    }

    #[test]
    fn test_copy_chunked_reports_progress_per_chunk() {
        let data = vec![7u8; 2500];
        let calls = RefCell::new(Vec::new());
        let progress = |done: u64, total: u64| calls.borrow_mut().push((done, total));

        copy_chunked(&mut Cursor::new(&data), &mut Vec::new(), 1000, 2500, Some(&progress)).unwrap();

        assert_eq!(*calls.borrow(), vec![(1000, 2500), (2000, 2500), (2500, 2500)]);
    }

    #[test]
    fn test_copy_chunked_empty_source() {
        let called = Cell::new(false);
        let progress = |_: u64, _: u64| called.set(true);

        let copied = copy_chunked(&mut Cursor::new(Vec::<u8>::new()), &mut Vec::new(), 64, 0, Some(&progress)).unwrap();

        assert_eq!(copied, 0);
        assert!(!called.get());
    }

    #[test]
    fn test_read_chunks_splits_by_block_size() {
        let data = vec![1u8; 2500];
        let chunks = read_chunks(&mut Cursor::new(&data), 2500, 1000).unwrap();
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
    }

    #[test]
    fn test_read_chunks_stops_at_declared_size() {
        let data = vec![1u8; 100];
        let chunks = read_chunks(&mut Cursor::new(&data), 40, 1000).unwrap();
        assert_eq!(chunks.concat().len(), 40);
    }

    #[test]
    fn test_read_chunks_short_source_fails() {
        let err = read_chunks(&mut Cursor::new(vec![0u8; 10]), 20, 8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
        assert!(err.to_string().contains("8 of 20"));
    }
}
