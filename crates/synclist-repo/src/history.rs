//! Undo/redo history with inverse-op synthesis and coalescing.
//!
//! History entries hold *unstamped* replay descriptors rather than emitted
//! operations: replaying an entry routes each descriptor back through the
//! ordinary repository generators, which stamp fresh clocks. The inverses
//! captured during that replay rewrite the opposite stack entry, so undo and
//! redo stay exact even where tombstone finality forces re-creation under a
//! fresh id.

use std::time::{Duration, Instant};
use synclist_common::Scope;
use synclist_crdt::OpKind;

/// Default coalescing window for rapid same-key edits.
pub const COALESCE_WINDOW: Duration = Duration::from_millis(1000);

/// An operation descriptor awaiting a clock stamp at replay time.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryOp {
    pub scope: Scope,
    pub resource_id: String,
    pub item_id: Option<String>,
    pub kind: OpKind,
}

/// One undoable step. Compound intents (moving a task across lists) carry
/// several descriptors replayed in order.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Descriptors that produce this step's change; kept for redo.
    pub forward: Vec<HistoryOp>,
    /// Descriptors that revert this step's change.
    pub inverse: Vec<HistoryOp>,
    pub label: String,
    /// Same-key entries within the window merge instead of stacking.
    pub coalesce_key: Option<String>,
    pub recorded_at: Instant,
}

impl HistoryEntry {
    pub fn new(
        forward: Vec<HistoryOp>,
        inverse: Vec<HistoryOp>,
        label: impl Into<String>,
        coalesce_key: Option<String>,
    ) -> Self {
        Self {
            forward,
            inverse,
            label: label.into(),
            coalesce_key,
            recorded_at: Instant::now(),
        }
    }
}

/// Undo and redo stacks with replay suppression.
pub struct HistoryManager {
    undo: Vec<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    window: Duration,
    suppress: u32,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryManager {
    pub fn new() -> Self {
        Self::with_window(COALESCE_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            window,
            suppress: 0,
        }
    }

    /// Record a new step. No-op while a replay is in flight. Clears the redo
    /// stack; merges into the top undo entry when the coalesce key matches,
    /// the resources match and the previous record is inside the window.
    pub fn record(&mut self, entry: HistoryEntry) {
        if self.is_suppressed() {
            return;
        }
        self.redo.clear();
        if let (Some(key), Some(top)) = (&entry.coalesce_key, self.undo.last_mut()) {
            let same_key = top.coalesce_key.as_ref() == Some(key);
            let in_window = entry.recorded_at.duration_since(top.recorded_at) < self.window;
            if same_key && in_window {
                // Newer forward ops, older inverse ops: one undo step spans
                // the whole burst.
                top.forward = entry.forward;
                top.recorded_at = entry.recorded_at;
                return;
            }
        }
        self.undo.push(entry);
    }

    pub fn pop_undo(&mut self) -> Option<HistoryEntry> {
        self.undo.pop()
    }

    pub fn pop_redo(&mut self) -> Option<HistoryEntry> {
        self.redo.pop()
    }

    /// Push the redo counterpart produced while undoing.
    pub fn push_redo(&mut self, entry: HistoryEntry) {
        self.redo.push(entry);
    }

    /// Push the undo counterpart produced while redoing; does not clear redo.
    pub fn push_undo(&mut self, entry: HistoryEntry) {
        self.undo.push(entry);
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    /// Reentrant suppression around history replay.
    pub fn suppress(&mut self) {
        self.suppress += 1;
    }

    pub fn resume(&mut self) {
        debug_assert!(self.suppress > 0);
        self.suppress = self.suppress.saturating_sub(1);
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppress > 0
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synclist_crdt::{TaskPatch, TitlePayload};

    fn update_entry(key: Option<&str>, text: &str) -> HistoryEntry {
        let op = HistoryOp {
            scope: Scope::List,
            resource_id: "l1".to_string(),
            item_id: Some("t1".to_string()),
            kind: OpKind::Update(TaskPatch {
                text: Some(text.to_string()),
                ..TaskPatch::default()
            }),
        };
        HistoryEntry::new(
            vec![op.clone()],
            vec![HistoryOp {
                kind: OpKind::Update(TaskPatch {
                    text: Some("before".to_string()),
                    ..TaskPatch::default()
                }),
                ..op
            }],
            "edit task",
            key.map(str::to_string),
        )
    }

    #[test]
    fn record_clears_redo() {
        let mut history = HistoryManager::new();
        history.record(update_entry(None, "a"));
        let entry = history.pop_undo().unwrap();
        history.push_redo(entry);
        assert!(history.can_redo());

        history.record(update_entry(None, "b"));
        assert!(!history.can_redo());
        assert_eq!(history.undo_depth(), 1);
    }

    #[test]
    fn same_key_entries_coalesce_within_window() {
        let mut history = HistoryManager::new();
        for text in ["h", "he", "hel", "hell", "hello"] {
            history.record(update_entry(Some("text:l1/t1"), text));
        }
        assert_eq!(history.undo_depth(), 1);
        let entry = history.pop_undo().unwrap();
        // Newest forward ops, oldest inverse ops.
        match &entry.forward[0].kind {
            OpKind::Update(patch) => assert_eq!(patch.text.as_deref(), Some("hello")),
            other => panic!("unexpected kind: {other:?}"),
        }
        match &entry.inverse[0].kind {
            OpKind::Update(patch) => assert_eq!(patch.text.as_deref(), Some("before")),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn different_keys_do_not_coalesce() {
        let mut history = HistoryManager::new();
        history.record(update_entry(Some("text:l1/t1"), "a"));
        history.record(update_entry(Some("note:l1/t1"), "b"));
        history.record(update_entry(None, "c"));
        assert_eq!(history.undo_depth(), 3);
    }

    #[test]
    fn zero_window_never_coalesces() {
        let mut history = HistoryManager::with_window(Duration::ZERO);
        history.record(update_entry(Some("text:l1/t1"), "a"));
        history.record(update_entry(Some("text:l1/t1"), "b"));
        assert_eq!(history.undo_depth(), 2);
    }

    #[test]
    fn suppression_is_reentrant() {
        let mut history = HistoryManager::new();
        history.suppress();
        history.suppress();
        history.record(update_entry(None, "a"));
        history.resume();
        history.record(update_entry(None, "b"));
        history.resume();
        assert!(!history.is_suppressed());
        assert_eq!(history.undo_depth(), 0);

        history.record(update_entry(None, "c"));
        assert_eq!(history.undo_depth(), 1);
    }

    #[test]
    fn rename_descriptor_shape() {
        // Registry descriptors reuse the same tagged variants as the wire.
        let op = HistoryOp {
            scope: Scope::Registry,
            resource_id: "registry".to_string(),
            item_id: Some("l1".to_string()),
            kind: OpKind::RenameList(TitlePayload {
                title: "Old".to_string(),
            }),
        };
        assert_eq!(op.kind.type_name(), "renameList");
    }
}
