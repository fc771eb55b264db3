use std::collections::VecDeque;

use crate::changeset::{ChangeSet, ItemInfo};

pub const DEFAULT_UNDO_DEPTH: usize = 100;

/// Prior states of in-place edits, newest last. Oldest entries fall off
/// once the log is full. There is no redo.
#[derive(Debug, Clone)]
pub struct UndoLog {
    entries: VecDeque<Vec<ItemInfo>>,
    capacity: usize,
}

impl Default for UndoLog {
    fn default() -> Self {
        Self::new(DEFAULT_UNDO_DEPTH)
    }
}

impl UndoLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record what the cells looked like before an in-place edit.
    pub fn backup(&mut self, prior: Vec<ItemInfo>) {
        if prior.is_empty() {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(prior);
    }

    /// The change that puts the most recent backup back.
    pub fn undo(&mut self) -> Option<ChangeSet> {
        self.entries.pop_back().map(ChangeSet::UpdateInPlace)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(text: &str) -> ItemInfo {
        ItemInfo::new(1, 0, "a", text)
    }

    #[test]
    fn test_lifo() {
        let mut log = UndoLog::default();
        log.backup(vec![item("1")]);
        log.backup(vec![item("2")]);
        assert_eq!(log.undo(), Some(ChangeSet::UpdateInPlace(vec![item("2")])));
        assert_eq!(log.undo(), Some(ChangeSet::UpdateInPlace(vec![item("1")])));
        assert_eq!(log.undo(), None);
    }

    #[test]
    fn test_bounded() {
        let mut log = UndoLog::new(3);
        for i in 0..5 {
            log.backup(vec![item(&i.to_string())]);
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.undo(), Some(ChangeSet::UpdateInPlace(vec![item("4")])));
        log.undo();
        assert_eq!(log.undo(), Some(ChangeSet::UpdateInPlace(vec![item("2")])));
        assert!(log.is_empty());
    }

    #[test]
    fn test_empty_backup_ignored() {
        let mut log = UndoLog::default();
        log.backup(vec![]);
        assert!(log.is_empty());
    }
}
