//! Per-height undo records.
//!
//! Each connected height leaves exactly one [`UndoEntry`]. Disconnecting a
//! height takes its entry out of the journal; it is never consulted twice.

use std::collections::{BTreeMap, BTreeSet};

use memwallet_core::types::OutPoint;

use crate::ledger::Utxo;

/// Ledger mutations made by one connected block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndoEntry {
    /// Outputs the block removed from the ledger, as they were before removal.
    pub destroyed: BTreeMap<OutPoint, Utxo>,
    /// Outputs the block added that were still unspent at the end of it.
    pub created: BTreeSet<OutPoint>,
}

impl UndoEntry {
    pub fn is_empty(&self) -> bool {
        self.destroyed.is_empty() && self.created.is_empty()
    }
}

#[derive(Debug, Default, Clone)]
pub struct ReorgJournal {
    entries: BTreeMap<u64, UndoEntry>,
}

impl ReorgJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the entry for `height`, returning any entry it replaced.
    pub fn record(&mut self, height: u64, entry: UndoEntry) -> Option<UndoEntry> {
        self.entries.insert(height, entry)
    }

    /// Remove and return the entry for `height`.
    pub fn take(&mut self, height: u64) -> Option<UndoEntry> {
        self.entries.remove(&height)
    }

    pub fn contains(&self, height: u64) -> bool {
        self.entries.contains_key(&height)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest height with an entry.
    pub fn tip(&self) -> Option<u64> {
        self.entries.keys().next_back().copied()
    }
}
