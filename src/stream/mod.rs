//! Coalesces interleaved stdout/stderr/stdin chunks into display entries.

use std::collections::VecDeque;

use serde::Serialize;

use crate::protocol::StreamName;

/// Default number of retained entries
pub const DEFAULT_CAPACITY: usize = 1000;

/// One display unit of program output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamEntry {
    /// Stable id, increasing in arrival order
    pub id: u64,
    pub stream: StreamName,
    pub text: String,
    /// Sealed entries never change again
    pub flushed: bool,
}

/// Interleaved display sequence of output entries.
#[derive(Debug, Clone)]
pub struct StreamMultiplexer {
    entries: VecDeque<StreamEntry>,
    capacity: usize,
    next_id: u64,
}

impl Default for StreamMultiplexer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl StreamMultiplexer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            next_id: 0,
        }
    }

    /// Add a chunk, returning the id of the entry it landed in.
    ///
    /// The chunk extends the most recent entry when that entry belongs to the
    /// same stream and is still open; otherwise it starts a new one. Empty
    /// chunks are ignored.
    pub fn push(&mut self, stream: StreamName, text: &str) -> Option<u64> {
        if text.is_empty() {
            return None;
        }

        if let Some(last) = self.entries.back_mut() {
            if last.stream == stream && !last.flushed {
                last.text.push_str(text);
                return Some(last.id);
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.entries.push_back(StreamEntry {
            id,
            stream,
            text: text.to_string(),
            flushed: false,
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        Some(id)
    }

    /// Seal the most recent open entry of `stream`.
    pub fn flush(&mut self, stream: StreamName) -> Option<u64> {
        let entry = self
            .entries
            .iter_mut()
            .rev()
            .find(|e| e.stream == stream && !e.flushed)?;
        entry.flushed = true;
        Some(entry.id)
    }

    /// Drop every entry. Ids keep increasing across clears.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> impl Iterator<Item = &StreamEntry> {
        self.entries.iter()
    }

    pub fn get(&self, id: u64) -> Option<&StreamEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
