use std::collections::HashSet;

use serde::{
    Deserialize,
    Serialize,
};

use crate::delta::FileDelta;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTotals {
    pub files_changed: usize,
    pub lines_added: usize,
    pub lines_removed: usize,
}

/// Append-only per-session tally of file deltas.
#[derive(Debug, Clone, Default)]
pub struct SessionAccumulator {
    file_changes: Vec<FileDelta>,
    totals: SessionTotals,
    seen: HashSet<String>,
}

impl SessionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `delta` for `file`. Deltas without any added or removed line are ignored.
    ///
    /// Returns whether the delta was recorded.
    pub fn record_file_edit(&mut self, file: &str, delta: FileDelta) -> bool {
        if delta.lines_added == 0 && delta.lines_removed == 0 {
            return false;
        }

        if self.seen.insert(file.to_owned()) {
            self.totals.files_changed += 1;
        }
        self.totals.lines_added += delta.lines_added;
        self.totals.lines_removed += delta.lines_removed;
        self.file_changes.push(delta);
        true
    }

    pub fn totals(&self) -> SessionTotals {
        self.totals
    }

    pub fn file_changes(&self) -> &[FileDelta] {
        &self.file_changes
    }

    pub fn has_pending_files(&self) -> bool {
        !self.file_changes.is_empty()
    }
}
