/// Undo/redo log: a finite stack of operation groups.
///
/// Each mutation records one group; bulk mutations record one group for the
/// whole batch so a single undo reverses it atomically. Applying an
/// operation yields its inverse (the store does the applying), so undo pops
/// a group, applies it, and pushes the resulting inverse group onto the redo
/// stack, and redo does the mirror image. Nothing re-registers itself.
use std::path::PathBuf;

use crate::types::{Board, Card};

/// One primitive, invertible persistence + in-memory operation.
#[derive(Debug, Clone)]
pub(crate) enum Op {
    /// Create the card file and insert the card.
    Insert(Card),
    /// Delete the card file and remove the card.
    Remove(Card),
    /// Overwrite one card with another version of itself.
    Replace { before: Box<Card>, after: Box<Card> },
    /// Move the card file into the archive and drop it from the collection.
    Archive(Card),
    /// Bring an archived card file back.
    Restore { card: Card, from: PathBuf },
    /// Swap the board configuration.
    SetBoard { before: Box<Board>, after: Box<Board> },
}

#[derive(Debug)]
pub(crate) struct Group {
    pub label: &'static str,
    /// Ordered ready-to-apply: applying these ops, in order, performs the
    /// undo (or redo) this group stands for.
    pub ops: Vec<Op>,
}

#[derive(Debug)]
pub(crate) struct UndoLog {
    undo: Vec<Group>,
    redo: Vec<Group>,
    limit: usize,
}

impl UndoLog {
    pub fn new(limit: usize) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            limit,
        }
    }

    /// Record a fresh mutation. Clears the redo stack: history has forked.
    pub fn record(&mut self, group: Group) {
        self.undo.push(group);
        if self.undo.len() > self.limit {
            self.undo.remove(0);
        }
        self.redo.clear();
    }

    pub fn pop_undo(&mut self) -> Option<Group> {
        self.undo.pop()
    }

    pub fn pop_redo(&mut self) -> Option<Group> {
        self.redo.pop()
    }

    /// Push the inverse of an undone group (called during undo only).
    pub fn push_redo(&mut self, group: Group) {
        self.redo.push(group);
    }

    /// Push the inverse of a redone group (called during redo only; does
    /// not clear the redo stack the way `record` does).
    pub fn push_undo(&mut self, group: Group) {
        self.undo.push(group);
        if self.undo.len() > self.limit {
            self.undo.remove(0);
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }
}
