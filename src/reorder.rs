//! Receive-side reordering engine: turns a lossy, duplicated, out-of-order
//! chunk stream into an in-order byte sink.

use std::collections::BTreeMap;
use std::io::{self, Write};

use crate::constants::{MAX_CHUNKS, MAX_PAYLOAD};

/// What `accept` did with a chunk. Duplicates and drops leave the buffer
/// untouched; the counters still advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// Fresh chunk, buffered (or ready to drain).
    Stored,
    /// Index already delivered or already buffered.
    Duplicate,
    /// Oversize payload or index past the chunk cap.
    Dropped,
}

/// Per-connection receiver state. `expected_seq` only ever moves forward,
/// and only `drain` moves it.
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    expected_seq: u32,
    buffer: BTreeMap<u32, Vec<u8>>,
    fin_seq: Option<u32>,
    duplicates: u64,
    chunks_written: u64,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify and buffer one incoming chunk.
    pub fn accept(&mut self, seq: u32, payload: Vec<u8>) -> Accepted {
        if payload.len() > MAX_PAYLOAD || seq > MAX_CHUNKS {
            return Accepted::Dropped;
        }

        if seq < self.expected_seq || self.buffer.contains_key(&seq) {
            self.duplicates += 1;
            return Accepted::Duplicate;
        }

        self.buffer.insert(seq, payload);
        Accepted::Stored
    }

    /// Record the terminal index. Immutable once set; retransmits of the
    /// FIN chunk carry the same index, so later calls are no-ops.
    pub fn record_fin(&mut self, seq: u32) {
        if self.fin_seq.is_none() {
            self.fin_seq = Some(seq);
        }
    }

    /// Append every contiguous buffered chunk to `sink`, advancing
    /// `expected_seq` past each one.
    pub fn drain<W: Write>(&mut self, sink: &mut W) -> io::Result<()> {
        while let Some(payload) = self.buffer.remove(&self.expected_seq) {
            sink.write_all(&payload)?;
            self.expected_seq += 1;
            self.chunks_written += 1;
        }
        Ok(())
    }

    /// Cumulative acknowledgement value: everything strictly below has
    /// been delivered to the sink.
    pub fn expected_seq(&self) -> u32 {
        self.expected_seq
    }

    pub fn fin_seq(&self) -> Option<u32> {
        self.fin_seq
    }

    /// True once the terminal chunk and everything before it are written.
    pub fn is_complete(&self) -> bool {
        matches!(self.fin_seq, Some(fin) if self.expected_seq == fin + 1)
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    pub fn chunks_written(&self) -> u64 {
        self.chunks_written
    }
}
