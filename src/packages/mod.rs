// src/packages/mod.rs

//! Package payload support
//!
//! Installation consumes packages through the [`Extractor`] trait. Archive
//! format parsing lives with the callers; [`MemoryArchive`] serves entries
//! that are already decoded.

pub mod traits;

pub use traits::{ArchiveEntry, EntryKind, Extractor};

use crate::error::Result;
use std::collections::VecDeque;

/// Extractor over a list of decoded entries
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    entries: VecDeque<ArchiveEntry>,
    total: u64,
}

impl MemoryArchive {
    pub fn new(entries: impl IntoIterator<Item = ArchiveEntry>) -> Self {
        let entries: VecDeque<ArchiveEntry> = entries.into_iter().collect();
        let total = entries.iter().map(|e| e.size).sum();
        Self { entries, total }
    }

    pub fn push(&mut self, entry: ArchiveEntry) {
        self.total += entry.size;
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Extractor for MemoryArchive {
    fn next_entry(&mut self) -> Result<Option<ArchiveEntry>> {
        Ok(self.entries.pop_front())
    }

    fn total_size(&self) -> Option<u64> {
        Some(self.total)
    }
}
