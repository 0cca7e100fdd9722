/// The authoritative in-memory card collection.
///
/// Every mutation follows the same sequence: validate against in-memory
/// invariants, persist through the storage layer, apply to the in-memory
/// collection, re-sort. A persistence failure aborts before the in-memory
/// step, so disk and memory never observably diverge from the caller's point
/// of view.
///
/// A single logical owner drives the store (`&mut self` everywhere); UI and
/// watcher callers marshal onto that owner. Collaborators observe it through
/// the broadcast event channel, not by sharing the struct.
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::codec::{self, CodecError};
use crate::config::Settings;
use crate::identity::generate_id;
use crate::position;
use crate::search;
use crate::storage::{LocalStore, PathKind, StorageError};
use crate::types::{now, Board, Card};
use crate::undo::{Group, Op, UndoLog};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown card: {0}")]
    UnknownCard(String),

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("unknown label: {0}")]
    UnknownLabel(String),

    #[error("a card titled {0:?} already exists")]
    DuplicateTitle(String),

    #[error("column already exists: {0}")]
    DuplicateColumn(String),

    #[error("label already exists: {0}")]
    DuplicateLabel(String),

    #[error("nothing to undo")]
    NothingToUndo,

    #[error("nothing to redo")]
    NothingToRedo,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Typed notifications pushed to whoever subscribed. This is the only way
/// the store talks to collaborators; there is no global event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StoreEvent {
    CardAdded { id: String },
    CardUpdated { id: String },
    CardRemoved { id: String },
    CardArchived { id: String, archived_to: PathBuf },
    BoardChanged,
    CollectionReloaded,
}

static COPY_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\s*\(Copy(?: \d+)?\))+$").unwrap());

pub struct Store {
    storage: LocalStore,
    board: Board,
    cards: Vec<Card>,
    undo: UndoLog,
    events: broadcast::Sender<StoreEvent>,
}

impl Store {
    /// Open an existing board directory.
    pub fn open(root: impl Into<PathBuf>, settings: &Settings) -> Result<Self, StoreError> {
        let storage = LocalStore::new(root);
        let (board, cards) = storage.load()?;
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        Ok(Self {
            storage,
            board,
            cards,
            undo: UndoLog::new(settings.undo_limit),
            events,
        })
    }

    /// Create a fresh board directory and open it.
    pub fn create(
        root: impl Into<PathBuf>,
        board: Board,
        settings: &Settings,
    ) -> Result<Self, StoreError> {
        let storage = LocalStore::new(root);
        storage.create_board(&board)?;
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        Ok(Self {
            storage,
            board,
            cards: Vec::new(),
            undo: UndoLog::new(settings.undo_limit),
            events,
        })
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// All cards, sorted by ordering key.
    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn card(&self, id: &str) -> Option<&Card> {
        self.cards.iter().find(|c| c.id == id)
    }

    /// Cards of one column, in board order.
    pub fn cards_in_column<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a Card> {
        self.cards.iter().filter(move |c| c.column == column)
    }

    /// Subscribe to store notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }

    /// Derived search view: text query intersected with a label filter.
    pub fn search(&self, query: &str, active_labels: &[String]) -> Vec<&Card> {
        search::filter(&self.cards, query, active_labels)
    }

    // ---- card mutations ----------------------------------------------------

    /// Add a card at the end of a column. A missing body gets the board
    /// template. Returns the new identity.
    pub fn add_card(
        &mut self,
        title: &str,
        column: &str,
        body: Option<String>,
    ) -> Result<String, StoreError> {
        if !self.board.has_column(column) {
            return Err(StoreError::UnknownColumn(column.to_string()));
        }
        if self.title_exists(title, None) {
            return Err(StoreError::DuplicateTitle(title.to_string()));
        }

        let position = match self.cards_in_column(column).last() {
            Some(last) => position::after(&last.position),
            None => position::first(),
        };
        let ts = now();
        let card = Card {
            id: generate_id(),
            title: title.to_string(),
            column: column.to_string(),
            position,
            created: ts,
            modified: ts,
            labels: Vec::new(),
            body: body
                .or_else(|| self.board.template.clone())
                .unwrap_or_default(),
        };
        let id = card.id.clone();
        self.mutate("add card", vec![Op::Insert(card)])?;
        Ok(id)
    }

    pub fn set_title(&mut self, id: &str, title: &str) -> Result<(), StoreError> {
        if self.title_exists(title, Some(id)) {
            return Err(StoreError::DuplicateTitle(title.to_string()));
        }
        let before = self.existing(id)?.clone();
        let mut after = before.clone();
        after.title = title.to_string();
        after.modified = now();
        self.mutate(
            "retitle card",
            vec![Op::Replace {
                before: Box::new(before),
                after: Box::new(after),
            }],
        )
    }

    pub fn set_body(&mut self, id: &str, body: &str) -> Result<(), StoreError> {
        let before = self.existing(id)?.clone();
        let mut after = before.clone();
        after.body = body.to_string();
        after.modified = now();
        self.mutate(
            "edit card",
            vec![Op::Replace {
                before: Box::new(before),
                after: Box::new(after),
            }],
        )
    }

    pub fn set_labels(&mut self, id: &str, labels: Vec<String>) -> Result<(), StoreError> {
        for label in &labels {
            if !self.board.has_label(label) {
                return Err(StoreError::UnknownLabel(label.clone()));
            }
        }
        let before = self.existing(id)?.clone();
        let mut after = before.clone();
        after.labels = labels;
        after.modified = now();
        self.mutate(
            "relabel card",
            vec![Op::Replace {
                before: Box::new(before),
                after: Box::new(after),
            }],
        )
    }

    /// Move a card to `index` within `column` (clamped to the column end).
    /// Only the moved card's file is touched; neighbors keep their keys.
    pub fn move_card(&mut self, id: &str, column: &str, index: usize) -> Result<(), StoreError> {
        if !self.board.has_column(column) {
            return Err(StoreError::UnknownColumn(column.to_string()));
        }
        let before = self.existing(id)?.clone();

        let neighbors: Vec<&Card> = self
            .cards
            .iter()
            .filter(|c| c.column == column && c.id != id)
            .collect();
        let index = index.min(neighbors.len());
        let position = match (
            index.checked_sub(1).and_then(|i| neighbors.get(i)),
            neighbors.get(index),
        ) {
            (None, None) => position::first(),
            (None, Some(next)) => position::before(&next.position),
            (Some(prev), None) => position::after(&prev.position),
            (Some(prev), Some(next)) => position::between(&prev.position, &next.position),
        };

        let mut after = before.clone();
        after.column = column.to_string();
        after.position = position;
        after.modified = now();
        self.mutate(
            "move card",
            vec![Op::Replace {
                before: Box::new(before),
                after: Box::new(after),
            }],
        )
    }

    /// Move several cards to the end of `column`, keeping their relative
    /// order. One undo group for the whole batch.
    pub fn move_many(&mut self, ids: &[String], column: &str) -> Result<(), StoreError> {
        if !self.board.has_column(column) {
            return Err(StoreError::UnknownColumn(column.to_string()));
        }
        let moving: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut last = self
            .cards
            .iter()
            .filter(|c| c.column == column && !moving.contains(c.id.as_str()))
            .next_back()
            .map(|c| c.position.clone());

        let mut ops = Vec::with_capacity(ids.len());
        for id in ids {
            let before = self.existing(id)?.clone();
            let mut after = before.clone();
            after.column = column.to_string();
            after.position = match &last {
                Some(key) => position::after(key),
                None => position::first(),
            };
            after.modified = now();
            last = Some(after.position.clone());
            ops.push(Op::Replace {
                before: Box::new(before),
                after: Box::new(after),
            });
        }
        self.mutate("move cards", ops)
    }

    pub fn delete_card(&mut self, id: &str) -> Result<(), StoreError> {
        let card = self.existing(id)?.clone();
        self.mutate("delete card", vec![Op::Remove(card)])
    }

    pub fn delete_many(&mut self, ids: &[String]) -> Result<(), StoreError> {
        let mut ops = Vec::with_capacity(ids.len());
        for id in ids {
            ops.push(Op::Remove(self.existing(id)?.clone()));
        }
        self.mutate("delete cards", ops)
    }

    /// Soft-delete: relocate the card file into the archive.
    pub fn archive_card(&mut self, id: &str) -> Result<(), StoreError> {
        let card = self.existing(id)?.clone();
        self.mutate("archive card", vec![Op::Archive(card)])
    }

    pub fn archive_many(&mut self, ids: &[String]) -> Result<(), StoreError> {
        let mut ops = Vec::with_capacity(ids.len());
        for id in ids {
            ops.push(Op::Archive(self.existing(id)?.clone()));
        }
        self.mutate("archive cards", ops)
    }

    /// Copy labels and body under a fresh identity, placed immediately after
    /// the source card, titled "<base> (Copy)", then "<base> (Copy 2)" and up. The
    /// source's own copy suffix is stripped first so repeated duplication
    /// doesn't stack suffixes.
    pub fn duplicate_card(&mut self, id: &str) -> Result<String, StoreError> {
        let source = self.existing(id)?.clone();

        let base = COPY_SUFFIX.replace(&source.title, "").to_string();
        let title = self.unique_copy_title(&base);

        let successor = self
            .cards_in_column(&source.column)
            .find(|c| c.position > source.position)
            .map(|c| c.position.clone());
        let position = match successor {
            Some(next) => position::between(&source.position, &next),
            None => position::after(&source.position),
        };

        let ts = now();
        let card = Card {
            id: generate_id(),
            title,
            column: source.column.clone(),
            position,
            created: ts,
            modified: ts,
            labels: source.labels.clone(),
            body: source.body.clone(),
        };
        let new_id = card.id.clone();
        self.mutate("duplicate card", vec![Op::Insert(card)])?;
        Ok(new_id)
    }

    // ---- board mutations ---------------------------------------------------

    pub fn set_board_title(&mut self, title: &str) -> Result<(), StoreError> {
        let mut after = self.board.clone();
        after.title = title.to_string();
        self.set_board("rename board", after)
    }

    pub fn set_template(&mut self, template: Option<String>) -> Result<(), StoreError> {
        let mut after = self.board.clone();
        after.template = template.filter(|t| !t.is_empty());
        self.set_board("edit template", after)
    }

    pub fn add_column(&mut self, id: &str, name: &str) -> Result<(), StoreError> {
        if self.board.has_column(id) {
            return Err(StoreError::DuplicateColumn(id.to_string()));
        }
        let mut after = self.board.clone();
        after.columns.push(crate::types::Column {
            id: id.to_string(),
            name: name.to_string(),
            collapsed: false,
        });
        self.set_board("add column", after)
    }

    pub fn rename_column(&mut self, id: &str, name: &str) -> Result<(), StoreError> {
        let mut after = self.board.clone();
        let column = after
            .columns
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::UnknownColumn(id.to_string()))?;
        column.name = name.to_string();
        self.set_board("rename column", after)
    }

    pub fn set_column_collapsed(&mut self, id: &str, collapsed: bool) -> Result<(), StoreError> {
        let mut after = self.board.clone();
        let column = after
            .columns
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::UnknownColumn(id.to_string()))?;
        column.collapsed = collapsed;
        self.set_board("collapse column", after)
    }

    /// Remove a column from the board. Deliberately non-cascading: cards
    /// referencing it stay on disk and in memory, orphaned until moved.
    pub fn remove_column(&mut self, id: &str) -> Result<(), StoreError> {
        if !self.board.has_column(id) {
            return Err(StoreError::UnknownColumn(id.to_string()));
        }
        let orphans = self.cards_in_column(id).count();
        if orphans > 0 {
            log::info!(
                "[tabula.store.board] Removing column {:?} leaves {} orphaned cards",
                id,
                orphans
            );
        }
        let mut after = self.board.clone();
        after.columns.retain(|c| c.id != id);
        self.set_board("remove column", after)
    }

    pub fn add_label(&mut self, id: &str, name: &str, color: &str) -> Result<(), StoreError> {
        if self.board.has_label(id) {
            return Err(StoreError::DuplicateLabel(id.to_string()));
        }
        let mut after = self.board.clone();
        after.labels.push(crate::types::Label {
            id: id.to_string(),
            name: name.to_string(),
            color: color.to_string(),
        });
        self.set_board("add label", after)
    }

    /// Non-cascading like `remove_column`: cards keep the dangling label id.
    pub fn remove_label(&mut self, id: &str) -> Result<(), StoreError> {
        if !self.board.has_label(id) {
            return Err(StoreError::UnknownLabel(id.to_string()));
        }
        let mut after = self.board.clone();
        after.labels.retain(|l| l.id != id);
        self.set_board("remove label", after)
    }

    // ---- undo / redo -------------------------------------------------------

    pub fn undo(&mut self) -> Result<(), StoreError> {
        let group = self.undo.pop_undo().ok_or(StoreError::NothingToUndo)?;
        let label = group.label;
        let inverses = self.apply_ops(group.ops)?;
        self.undo.push_redo(Group {
            label,
            ops: inverses,
        });
        Ok(())
    }

    pub fn redo(&mut self) -> Result<(), StoreError> {
        let group = self.undo.pop_redo().ok_or(StoreError::NothingToRedo)?;
        let label = group.label;
        let inverses = self.apply_ops(group.ops)?;
        self.undo.push_undo(Group {
            label,
            ops: inverses,
        });
        Ok(())
    }

    // ---- reconciliation ----------------------------------------------------

    /// Re-read one card from disk after an external change. A vanished file
    /// drops the card; an unchanged file is a no-op; a parse failure
    /// surfaces. Never touches the undo log: external changes win and are
    /// not undoable. Returns whether anything changed.
    pub fn reload_card(&mut self, id: &str) -> Result<bool, StoreError> {
        let Some(path) = self.storage.find_record(id) else {
            if self.remove_in_memory(id).is_some() {
                self.emit(StoreEvent::CardRemoved { id: id.to_string() });
                return Ok(true);
            }
            return Ok(false);
        };

        let content = fs::read_to_string(&path).map_err(StorageError::Io)?;
        let mut card = codec::parse_card(id, &content)?;
        if let PathKind::Record { column, .. } = self.storage.paths().classify(&path) {
            card.column = column;
        }

        match self.cards.iter().position(|c| c.id == id) {
            Some(idx) if self.cards[idx] == card => Ok(false),
            Some(idx) => {
                self.cards[idx] = card;
                self.sort_cards();
                self.emit(StoreEvent::CardUpdated { id: id.to_string() });
                Ok(true)
            }
            None => {
                self.add_external(card);
                Ok(true)
            }
        }
    }

    /// Insert a card discovered on disk by the watcher. Duplicate titles
    /// from outside are tolerated; external changes always win.
    pub fn add_external(&mut self, card: Card) {
        if let Some(idx) = self.cards.iter().position(|c| c.id == card.id) {
            if self.cards[idx] == card {
                return;
            }
            let id = card.id.clone();
            self.cards[idx] = card;
            self.sort_cards();
            self.emit(StoreEvent::CardUpdated { id });
            return;
        }
        if self.title_exists(&card.title, Some(&card.id)) {
            log::warn!(
                "[tabula.store.reconcile] External card {} duplicates title {:?}",
                card.id,
                card.title
            );
        }
        let id = card.id.clone();
        self.cards.push(card);
        self.sort_cards();
        self.emit(StoreEvent::CardAdded { id });
    }

    /// Drop every in-memory card whose identity is not in the on-disk set.
    /// Returns how many were dropped.
    pub fn remove_missing(&mut self, on_disk: &HashSet<String>) -> usize {
        let gone: Vec<String> = self
            .cards
            .iter()
            .filter(|c| !on_disk.contains(&c.id))
            .map(|c| c.id.clone())
            .collect();
        for id in &gone {
            self.remove_in_memory(id);
            self.emit(StoreEvent::CardRemoved { id: id.clone() });
        }
        gone.len()
    }

    /// Re-read the board file after an external change.
    pub fn reload_board(&mut self) -> Result<bool, StoreError> {
        let board = self.storage.load_board()?;
        if board == self.board {
            return Ok(false);
        }
        self.board = board;
        self.emit(StoreEvent::BoardChanged);
        Ok(true)
    }

    /// Drive reconciliation from a pre-debounced watcher batch. Self-writes
    /// are suppressed via content fingerprints; individual failures are
    /// logged and skipped, never aborting the rest of the batch.
    pub fn apply_changes(&mut self, paths: &[PathBuf]) {
        let mut changed = false;
        for path in paths {
            if self.storage.note_external_change(path) {
                log::debug!("[tabula.store.reconcile] Ignoring self-write at {:?}", path);
                continue;
            }
            match self.storage.paths().classify(path) {
                PathKind::Board => match self.reload_board() {
                    Ok(c) => changed |= c,
                    Err(e) => {
                        log::warn!("[tabula.store.reconcile] Board reload failed: {}", e);
                    }
                },
                PathKind::Record { id, .. } => match self.reload_card(&id) {
                    Ok(c) => changed |= c,
                    Err(e) => {
                        log::warn!(
                            "[tabula.store.reconcile] Reload of card {} failed: {}",
                            id,
                            e
                        );
                    }
                },
                PathKind::Other => {}
            }
        }
        if changed {
            self.emit(StoreEvent::CollectionReloaded);
        }
    }

    /// Full resync against the on-disk identity set, for watchers that only
    /// report "something under this tree changed".
    pub fn rescan(&mut self) -> Result<(), StoreError> {
        let on_disk = self.storage.record_ids();
        self.remove_missing(&on_disk);
        for id in on_disk {
            if let Err(e) = self.reload_card(&id) {
                log::warn!("[tabula.store.reconcile] Rescan of card {} failed: {}", id, e);
            }
        }
        self.reload_board()?;
        Ok(())
    }

    // ---- internals ---------------------------------------------------------

    fn existing(&self, id: &str) -> Result<&Card, StoreError> {
        self.card(id)
            .ok_or_else(|| StoreError::UnknownCard(id.to_string()))
    }

    fn title_exists(&self, title: &str, exclude: Option<&str>) -> bool {
        self.cards
            .iter()
            .any(|c| c.title == title && Some(c.id.as_str()) != exclude)
    }

    fn unique_copy_title(&self, base: &str) -> String {
        let candidate = format!("{} (Copy)", base);
        if !self.title_exists(&candidate, None) {
            return candidate;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{} (Copy {})", base, n);
            if !self.title_exists(&candidate, None) {
                return candidate;
            }
            n += 1;
        }
    }

    fn set_board(&mut self, label: &'static str, after: Board) -> Result<(), StoreError> {
        let before = self.board.clone();
        self.mutate(
            label,
            vec![Op::SetBoard {
                before: Box::new(before),
                after: Box::new(after),
            }],
        )
    }

    /// Run one mutation: apply its ops, then record the inverse group.
    fn mutate(&mut self, label: &'static str, ops: Vec<Op>) -> Result<(), StoreError> {
        let inverses = self.apply_ops(ops)?;
        self.undo.record(Group {
            label,
            ops: inverses,
        });
        Ok(())
    }

    /// Apply a batch of ops in order; returns the inverse batch, reversed
    /// and ready to apply. On a mid-batch failure the inverses of the ops
    /// that did land are recorded so the partial effect stays undoable.
    fn apply_ops(&mut self, ops: Vec<Op>) -> Result<Vec<Op>, StoreError> {
        let mut inverses = Vec::with_capacity(ops.len());
        let mut failure = None;
        for op in ops {
            match self.apply_op(op) {
                Ok(inverse) => inverses.push(inverse),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        inverses.reverse();
        self.sort_cards();
        match failure {
            None => Ok(inverses),
            Some(e) => {
                if !inverses.is_empty() {
                    log::warn!(
                        "[tabula.store.bulk] Batch failed part-way through, keeping partial undo"
                    );
                    self.undo.record(Group {
                        label: "partial change",
                        ops: inverses,
                    });
                }
                Err(e)
            }
        }
    }

    /// Apply one op: persist first, then memory. Returns the inverse op.
    fn apply_op(&mut self, op: Op) -> Result<Op, StoreError> {
        match op {
            Op::Insert(card) => {
                self.storage.create_card(&card)?;
                self.cards.push(card.clone());
                self.emit(StoreEvent::CardAdded {
                    id: card.id.clone(),
                });
                Ok(Op::Remove(card))
            }
            Op::Remove(card) => {
                self.storage.delete_card(&card)?;
                self.remove_in_memory(&card.id);
                self.emit(StoreEvent::CardRemoved {
                    id: card.id.clone(),
                });
                Ok(Op::Insert(card))
            }
            Op::Replace { before, after } => {
                self.storage.save_card(&after, Some(&before.column))?;
                if let Some(idx) = self.cards.iter().position(|c| c.id == after.id) {
                    self.cards[idx] = (*after).clone();
                }
                self.emit(StoreEvent::CardUpdated {
                    id: after.id.clone(),
                });
                Ok(Op::Replace {
                    before: after,
                    after: before,
                })
            }
            Op::Archive(card) => {
                let archived_to = self.storage.archive_card(&card)?;
                self.remove_in_memory(&card.id);
                self.emit(StoreEvent::CardArchived {
                    id: card.id.clone(),
                    archived_to: archived_to.clone(),
                });
                Ok(Op::Restore {
                    card,
                    from: archived_to,
                })
            }
            Op::Restore { card, from } => {
                self.storage.restore_card(&card, &from)?;
                self.cards.push(card.clone());
                self.emit(StoreEvent::CardAdded {
                    id: card.id.clone(),
                });
                Ok(Op::Archive(card))
            }
            Op::SetBoard { before, after } => {
                self.storage.save_board(&after)?;
                self.board = (*after).clone();
                self.emit(StoreEvent::BoardChanged);
                Ok(Op::SetBoard {
                    before: after,
                    after: before,
                })
            }
        }
    }

    fn remove_in_memory(&mut self, id: &str) -> Option<Card> {
        let idx = self.cards.iter().position(|c| c.id == id)?;
        Some(self.cards.remove(idx))
    }

    fn sort_cards(&mut self) {
        self.cards.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }

    fn emit(&self, event: StoreEvent) {
        // No receivers is fine; events are an optional observation channel.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Column, Label};
    use tempfile::TempDir;

    fn board_fixture() -> Board {
        Board {
            title: "Test Board".to_string(),
            columns: ["todo", "doing", "done"]
                .iter()
                .map(|id| Column {
                    id: id.to_string(),
                    name: id.to_string(),
                    collapsed: false,
                })
                .collect(),
            labels: vec![
                Label {
                    id: "bug".to_string(),
                    name: "Bug".to_string(),
                    color: "#e74c3c".to_string(),
                },
                Label {
                    id: "idea".to_string(),
                    name: "Idea".to_string(),
                    color: "#3498db".to_string(),
                },
            ],
            template: None,
        }
    }

    fn open_store() -> (TempDir, Store) {
        let tmp = TempDir::new().unwrap();
        let store = Store::create(tmp.path(), board_fixture(), &Settings::default()).unwrap();
        (tmp, store)
    }

    fn record_path(store: &Store, id: &str) -> PathBuf {
        store.storage.find_record(id).unwrap()
    }

    #[test]
    fn test_add_persists_and_survives_reopen() {
        let (tmp, mut store) = open_store();
        let id = store.add_card("Buy milk", "todo", None).unwrap();
        assert!(record_path(&store, &id).exists());

        let reopened = Store::open(tmp.path(), &Settings::default()).unwrap();
        assert_eq!(reopened.cards().len(), 1);
        assert_eq!(reopened.card(&id).unwrap().title, "Buy milk");
    }

    #[test]
    fn test_add_rejects_duplicate_title_and_unknown_column() {
        let (_tmp, mut store) = open_store();
        store.add_card("Buy milk", "todo", None).unwrap();
        assert!(matches!(
            store.add_card("Buy milk", "done", None),
            Err(StoreError::DuplicateTitle(_))
        ));
        assert!(matches!(
            store.add_card("Other", "nope", None),
            Err(StoreError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_add_applies_template() {
        let tmp = TempDir::new().unwrap();
        let mut board = board_fixture();
        board.template = Some("## Notes".to_string());
        let mut store = Store::create(tmp.path(), board, &Settings::default()).unwrap();

        let with_template = store.add_card("A", "todo", None).unwrap();
        let explicit = store.add_card("B", "todo", Some("own body".to_string())).unwrap();
        assert_eq!(store.card(&with_template).unwrap().body, "## Notes");
        assert_eq!(store.card(&explicit).unwrap().body, "own body");
    }

    #[test]
    fn test_cards_append_in_order() {
        let (_tmp, mut store) = open_store();
        let a = store.add_card("A", "todo", None).unwrap();
        let b = store.add_card("B", "todo", None).unwrap();
        let c = store.add_card("C", "todo", None).unwrap();
        let order: Vec<&str> = store.cards_in_column("todo").map(|c| c.id.as_str()).collect();
        assert_eq!(order, vec![a.as_str(), b.as_str(), c.as_str()]);
    }

    #[test]
    fn test_set_labels_validates_against_board() {
        let (_tmp, mut store) = open_store();
        let id = store.add_card("A", "todo", None).unwrap();
        store.set_labels(&id, vec!["bug".to_string()]).unwrap();
        assert!(matches!(
            store.set_labels(&id, vec!["nope".to_string()]),
            Err(StoreError::UnknownLabel(_))
        ));
    }

    #[test]
    fn test_move_card_across_columns_moves_file() {
        let (_tmp, mut store) = open_store();
        let id = store.add_card("A", "todo", None).unwrap();
        let old_path = record_path(&store, &id);

        store.move_card(&id, "done", 0).unwrap();
        assert_eq!(store.card(&id).unwrap().column, "done");
        assert!(!old_path.exists());
        assert!(record_path(&store, &id).ends_with("records/done/".to_string() + &id + ".md"));
    }

    #[test]
    fn test_move_card_within_column_reorders_without_touching_neighbors() {
        let (_tmp, mut store) = open_store();
        let a = store.add_card("A", "todo", None).unwrap();
        let b = store.add_card("B", "todo", None).unwrap();
        let c = store.add_card("C", "todo", None).unwrap();

        let a_file = fs::read_to_string(record_path(&store, &a)).unwrap();
        let b_file = fs::read_to_string(record_path(&store, &b)).unwrap();

        store.move_card(&c, "todo", 0).unwrap();
        let order: Vec<&str> = store.cards_in_column("todo").map(|c| c.id.as_str()).collect();
        assert_eq!(order, vec![c.as_str(), a.as_str(), b.as_str()]);

        // Neighbors were never rewritten.
        assert_eq!(fs::read_to_string(record_path(&store, &a)).unwrap(), a_file);
        assert_eq!(fs::read_to_string(record_path(&store, &b)).unwrap(), b_file);
    }

    #[test]
    fn test_insertions_never_renumber_existing_files() {
        let (_tmp, mut store) = open_store();
        let a = store.add_card("A", "todo", None).unwrap();
        let b = store.add_card("B", "todo", None).unwrap();
        let a_file = fs::read_to_string(record_path(&store, &a)).unwrap();
        let b_file = fs::read_to_string(record_path(&store, &b)).unwrap();

        // Duplicating A inserts between A and B.
        for _ in 0..5 {
            store.duplicate_card(&a).unwrap();
        }
        assert_eq!(fs::read_to_string(record_path(&store, &a)).unwrap(), a_file);
        assert_eq!(fs::read_to_string(record_path(&store, &b)).unwrap(), b_file);
    }

    #[test]
    fn test_delete_undo_redo() {
        let (_tmp, mut store) = open_store();
        let id = store.add_card("A", "todo", None).unwrap();
        let path = record_path(&store, &id);

        store.delete_card(&id).unwrap();
        assert!(store.card(&id).is_none());
        assert!(!path.exists());

        store.undo().unwrap();
        assert_eq!(store.card(&id).unwrap().title, "A");
        assert!(path.exists());

        store.redo().unwrap();
        assert!(store.card(&id).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_bulk_delete_is_one_undo_group() {
        let (_tmp, mut store) = open_store();
        let a = store.add_card("A", "todo", None).unwrap();
        let b = store.add_card("B", "doing", None).unwrap();
        store.delete_many(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(store.cards().len(), 0);

        store.undo().unwrap();
        assert_eq!(store.cards().len(), 2);
        assert!(store.card(&a).is_some());
        assert!(store.card(&b).is_some());
    }

    #[test]
    fn test_archive_and_undo() {
        let (_tmp, mut store) = open_store();
        let id = store.add_card("A", "todo", None).unwrap();
        let record = record_path(&store, &id);

        store.archive_card(&id).unwrap();
        assert!(store.card(&id).is_none());
        assert!(!record.exists());
        let archive_dir = store.storage.paths().archive_dir();
        assert_eq!(fs::read_dir(&archive_dir).unwrap().count(), 1);

        store.undo().unwrap();
        assert!(store.card(&id).is_some());
        assert!(record.exists());
        assert_eq!(fs::read_dir(&archive_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_duplicate_generates_copy_titles() {
        let (_tmp, mut store) = open_store();
        let id = store.add_card("My Card", "todo", None).unwrap();

        let copy = store.duplicate_card(&id).unwrap();
        assert_eq!(store.card(&copy).unwrap().title, "My Card (Copy)");

        // "My Card (Copy)" exists now, so the next copy counts up.
        let copy2 = store.duplicate_card(&id).unwrap();
        assert_eq!(store.card(&copy2).unwrap().title, "My Card (Copy 2)");
    }

    #[test]
    fn test_duplicate_strips_existing_suffix() {
        let (_tmp, mut store) = open_store();
        store.add_card("My Card", "todo", None).unwrap();
        let copy = {
            let id = store
                .cards()
                .iter()
                .find(|c| c.title == "My Card")
                .unwrap()
                .id
                .clone();
            store.duplicate_card(&id).unwrap()
        };
        // Duplicating the copy yields "(Copy 2)", not "(Copy) (Copy)".
        let copy2 = store.duplicate_card(&copy).unwrap();
        assert_eq!(store.card(&copy2).unwrap().title, "My Card (Copy 2)");
    }

    #[test]
    fn test_duplicate_lands_right_after_source() {
        let (_tmp, mut store) = open_store();
        let a = store.add_card("A", "todo", None).unwrap();
        store.add_card("B", "todo", None).unwrap();

        let copy = store.duplicate_card(&a).unwrap();
        let order: Vec<&str> = store
            .cards_in_column("todo")
            .map(|c| c.title.as_str())
            .collect();
        assert_eq!(order, vec!["A", "A (Copy)", "B"]);
        assert_eq!(store.card(&copy).unwrap().labels, Vec::<String>::new());
    }

    #[test]
    fn test_undo_empty_and_redo_cleared_by_mutation() {
        let (_tmp, mut store) = open_store();
        assert!(matches!(store.undo(), Err(StoreError::NothingToUndo)));

        let id = store.add_card("A", "todo", None).unwrap();
        store.undo().unwrap();
        assert!(store.can_redo());

        // A fresh mutation forks history and clears redo.
        store.add_card("B", "todo", None).unwrap();
        assert!(!store.can_redo());
        assert!(matches!(store.redo(), Err(StoreError::NothingToRedo)));
        assert!(store.card(&id).is_none());
    }

    #[test]
    fn test_board_mutations_are_undoable() {
        let (_tmp, mut store) = open_store();
        store.add_column("blocked", "Blocked").unwrap();
        assert!(store.board().has_column("blocked"));

        store.undo().unwrap();
        assert!(!store.board().has_column("blocked"));

        store.redo().unwrap();
        assert!(store.board().has_column("blocked"));
    }

    #[test]
    fn test_remove_column_is_non_cascading() {
        let (_tmp, mut store) = open_store();
        let id = store.add_card("A", "doing", None).unwrap();
        store.remove_column("doing").unwrap();
        assert!(!store.board().has_column("doing"));
        // The card survives, orphaned.
        assert_eq!(store.card(&id).unwrap().column, "doing");
        assert!(record_path(&store, &id).exists());
    }

    #[test]
    fn test_events_are_emitted() {
        let (_tmp, mut store) = open_store();
        let mut rx = store.subscribe();
        let id = store.add_card("A", "todo", None).unwrap();
        match rx.try_recv().unwrap() {
            StoreEvent::CardAdded { id: event_id } => assert_eq!(event_id, id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_reconcile_external_add_edit_delete() {
        let (_tmp, mut store) = open_store();
        let paths = store.storage.paths().clone();

        // External add: another tool drops a well-formed file in.
        let external = paths.record_file("todo", "feedbeef");
        fs::create_dir_all(external.parent().unwrap()).unwrap();
        fs::write(
            &external,
            "---\ntitle: From outside\ncolumn: todo\nposition: x\n---\n\nhello\n",
        )
        .unwrap();
        store.apply_changes(&[external.clone()]);
        assert_eq!(store.card("feedbeef").unwrap().body, "hello");

        // External edit.
        fs::write(
            &external,
            "---\ntitle: From outside\ncolumn: todo\nposition: x\n---\n\nchanged\n",
        )
        .unwrap();
        store.apply_changes(&[external.clone()]);
        assert_eq!(store.card("feedbeef").unwrap().body, "changed");

        // External delete.
        fs::remove_file(&external).unwrap();
        store.apply_changes(&[external]);
        assert!(store.card("feedbeef").is_none());
    }

    #[test]
    fn test_reconcile_suppresses_own_writes() {
        let (_tmp, mut store) = open_store();
        let id = store.add_card("A", "todo", None).unwrap();
        let path = record_path(&store, &id);
        let before = store.card(&id).unwrap().clone();

        // The watcher reports our own write; nothing changes.
        let mut rx = store.subscribe();
        store.apply_changes(&[path]);
        assert_eq!(store.card(&id).unwrap(), &before);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let (_tmp, mut store) = open_store();
        let id = store.add_card("A", "todo", None).unwrap();
        let path = record_path(&store, &id);

        // First pass consumes the self-write fingerprint; the second sees an
        // unchanged external file and must be a no-op.
        store.apply_changes(&[path.clone()]);
        let mut rx = store.subscribe();
        store.apply_changes(&[path]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reconcile_board_change() {
        let (_tmp, mut store) = open_store();
        let board_file = store.storage.paths().board_file();
        let mut renamed = board_fixture();
        renamed.title = "Renamed".to_string();
        fs::write(&board_file, codec::serialize_board(&renamed)).unwrap();

        store.apply_changes(&[board_file]);
        assert_eq!(store.board().title, "Renamed");
    }

    #[test]
    fn test_remove_missing() {
        let (_tmp, mut store) = open_store();
        let a = store.add_card("A", "todo", None).unwrap();
        let b = store.add_card("B", "todo", None).unwrap();

        let mut on_disk = HashSet::new();
        on_disk.insert(b.clone());
        assert_eq!(store.remove_missing(&on_disk), 1);
        assert!(store.card(&a).is_none());
        assert!(store.card(&b).is_some());
    }

    #[test]
    fn test_search_view() {
        let (_tmp, mut store) = open_store();
        let a = store.add_card("Fix login", "todo", None).unwrap();
        store.add_card("Write docs", "todo", None).unwrap();
        store.set_labels(&a, vec!["bug".to_string()]).unwrap();

        assert_eq!(store.search("fix", &[]).len(), 1);
        assert_eq!(store.search("", &["bug".to_string()]).len(), 1);
        assert_eq!(store.search("docs", &["bug".to_string()]).len(), 0);
        // The view never mutates the collection.
        assert_eq!(store.cards().len(), 2);
    }

    #[test]
    fn test_store_event_serializes_tagged() {
        let json = serde_json::to_string(&StoreEvent::CardAdded {
            id: "a1b2c3d4".to_string(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"CardAdded\""));
    }
}
