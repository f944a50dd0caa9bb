//! Session-owned display list.
//!
//! One [`ChatLog`] exists per interactive session and is dropped with
//! it. It keeps the most recent entries only.

use std::collections::VecDeque;

use chrono::{DateTime, Local};
use serde::Serialize;

use chatrelay_types::Transport;

/// Entries kept before the oldest is evicted.
pub const DEFAULT_CAPACITY: usize = 500;

/// What a log line records.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum EntryKind {
    /// A chat message received from a peer or queue.
    Incoming { transport: Transport },
    /// A message sent by this session.
    Outgoing,
    /// A send failure or malformed inbound payload.
    Problem { transport: Transport },
}

/// One display line.
#[derive(Clone, Debug, Serialize)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub kind: EntryKind,
    pub text: String,
}

/// Bounded, append-only display list.
#[derive(Debug)]
pub struct ChatLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl ChatLog {
    /// Creates a log holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
        }
    }

    /// Appends an entry, evicting the oldest when full.
    pub fn push(&mut self, kind: EntryKind, text: impl Into<String>) -> &LogEntry {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            at: Local::now(),
            kind,
            text: text.into(),
        });
        // Non-empty: an entry was just pushed.
        &self.entries[self.entries.len() - 1]
    }

    /// Entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
