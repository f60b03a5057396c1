//! Splitting the upstream body into newline-delimited records.

use bytes::{Buf, Bytes, BytesMut};
use relay_common::StreamChunk;

/// Upstream end-of-stream marker; the gateway emits its own.
const UPSTREAM_DONE: &[u8] = b"[DONE]";

/// One decoded upstream record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Chunk(StreamChunk),
    /// A line that did not decode as a chunk, byte for byte minus its terminator.
    Raw(Bytes),
}

impl Record {
    pub fn is_finished(&self) -> bool {
        matches!(self, Record::Chunk(chunk) if chunk.finished)
    }
}

/// Decode a single line. Blank lines and the upstream `[DONE]` marker yield `None`.
pub fn decode_record(line: &[u8]) -> Option<Record> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() || trimmed == UPSTREAM_DONE {
        return None;
    }

    match serde_json::from_slice::<StreamChunk>(trimmed) {
        Ok(chunk) => Some(Record::Chunk(chunk)),
        Err(e) => {
            let preview: String = String::from_utf8_lossy(trimmed).chars().take(100).collect();
            tracing::warn!(error = %e, record = %preview, "Malformed upstream record, forwarding raw");
            Some(Record::Raw(Bytes::copy_from_slice(line)))
        }
    }
}

/// Incremental line reader.
///
/// Blocks are pushed as they arrive; complete lines are handed out through
/// [`RecordReader::drain`]. A trailing partial line stays buffered until more
/// data arrives or [`RecordReader::finish`] is called.
#[derive(Debug, Default)]
pub struct RecordReader {
    buf: BytesMut,
}

impl RecordReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, block: &[u8]) {
        self.buf.extend_from_slice(block);
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Take the next complete line, without its terminator.
    fn next_line(&mut self) -> Option<Bytes> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let line = self.buf.split_to(pos).freeze();
        self.buf.advance(1);
        Some(line)
    }

    /// Decoded records for every complete line buffered so far.
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { reader: self }
    }

    /// Decode whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<Record> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = self.buf.split().freeze();
        decode_record(&rest)
    }
}

/// Lazy iterator over the complete records in a [`RecordReader`].
pub struct Drain<'a> {
    reader: &'a mut RecordReader,
}

impl Iterator for Drain<'_> {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        loop {
            let line = self.reader.next_line()?;
            if let Some(record) = decode_record(&line) {
                return Some(record);
            }
        }
    }
}
