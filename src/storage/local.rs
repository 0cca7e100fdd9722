/// Local filesystem persistence for one board directory.
///
/// Layout:
///   <root>/board.md                     board configuration + template
///   <root>/records/<column>/<id>.md     one file per card
///   <root>/archive/<date>-<id>.md       archived cards, relocated not rewritten
///
/// Every write is atomic (write to a temp name in the same directory, fsync,
/// rename, fsync the directory), and every write registers a content
/// fingerprint so watcher notifications for our own writes can be told apart
/// from external edits.
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;

use super::{BoardPaths, StorageError, RECORD_EXT};
use crate::codec;
use crate::types::{Board, Card};
use crate::watcher::SelfWriteTracker;

pub struct LocalStore {
    paths: BoardPaths,
    self_writes: Mutex<SelfWriteTracker>,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            paths: BoardPaths::new(root),
            self_writes: Mutex::new(SelfWriteTracker::new()),
        }
    }

    pub fn paths(&self) -> &BoardPaths {
        &self.paths
    }

    /// Create a fresh board directory: root, records/, archive/, board file.
    pub fn create_board(&self, board: &Board) -> Result<(), StorageError> {
        fs::create_dir_all(self.paths.root())?;
        fs::create_dir_all(self.paths.records_dir())?;
        fs::create_dir_all(self.paths.archive_dir())?;
        self.save_board(board)
    }

    /// Read and parse the board file. Absent or unparsable is a hard error;
    /// without the board configuration nothing else can be interpreted.
    pub fn load_board(&self) -> Result<Board, StorageError> {
        let path = self.paths.board_file();
        let content = fs::read_to_string(&path)?;
        codec::parse_board(&content).map_err(|source| StorageError::InvalidBoard { path, source })
    }

    /// Read every card file under records/, sorted by ordering key. A single
    /// unparsable file is skipped with a warning, never a load failure.
    pub fn load_cards(&self) -> Result<Vec<Card>, StorageError> {
        let records = self.paths.records_dir();
        fs::create_dir_all(&records)?;

        let mut cards = Vec::new();
        for column_entry in fs::read_dir(&records)? {
            let column_entry = column_entry?;
            if !column_entry.file_type()?.is_dir() {
                continue;
            }
            let Some(column) = column_entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            for file_entry in fs::read_dir(column_entry.path())? {
                let path = file_entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                    continue;
                }
                if let Some(card) = self.read_card_file(&path, &column) {
                    cards.push(card);
                }
            }
        }

        cards.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(cards)
    }

    /// Read one card file, fixing up a column field that disagrees with the
    /// directory it sits in (the path decides where a card lives).
    fn read_card_file(&self, path: &Path, column: &str) -> Option<Card> {
        let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
            return None;
        };
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("[tabula.storage.load] Skipping unreadable file {:?}: {}", path, e);
                return None;
            }
        };
        match codec::parse_card(id, &content) {
            Ok(mut card) => {
                if card.column != column {
                    log::warn!(
                        "[tabula.storage.load] Card {} claims column {:?} but sits in {:?}, trusting the path",
                        id,
                        card.column,
                        column
                    );
                    card.column = column.to_string();
                }
                Some(card)
            }
            Err(e) => {
                log::warn!("[tabula.storage.load] Skipping unparsable file {:?}: {}", path, e);
                None
            }
        }
    }

    /// Load the whole collection: board first (hard error), then cards.
    pub fn load(&self) -> Result<(Board, Vec<Card>), StorageError> {
        let board = self.load_board()?;
        let cards = self.load_cards()?;
        Ok((board, cards))
    }

    /// Write a card that must not exist yet.
    pub fn create_card(&self, card: &Card) -> Result<(), StorageError> {
        let path = self.paths.record_file(&card.column, &card.id);
        if path.exists() {
            return Err(StorageError::DuplicateId(card.id.clone()));
        }
        self.write_card(card)
    }

    /// Write a new or updated card. When the column changed, the old file is
    /// removed first so version control sees a move, not a copy.
    pub fn save_card(&self, card: &Card, previous_column: Option<&str>) -> Result<(), StorageError> {
        if let Some(previous) = previous_column {
            if previous != card.column {
                let old = self.paths.record_file(previous, &card.id);
                match fs::remove_file(&old) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        self.write_card(card)
    }

    /// Remove a card file. Missing is fine; deletes are idempotent.
    pub fn delete_card(&self, card: &Card) -> Result<(), StorageError> {
        let path = self.paths.record_file(&card.column, &card.id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Move a card file into the archive under a date-prefixed name. On a
    /// same-day collision an incrementing suffix is appended until a free
    /// name is found; no archival ever overwrites another.
    pub fn archive_card(&self, card: &Card) -> Result<PathBuf, StorageError> {
        let archive = self.paths.archive_dir();
        fs::create_dir_all(&archive)?;

        let date = Local::now().format("%Y-%m-%d");
        let base = format!("{}-{}.{}", date, card.id, RECORD_EXT);
        let mut dest = archive.join(&base);
        let mut n = 2;
        while dest.exists() {
            dest = archive.join(format!("{}-{}", base, n));
            n += 1;
        }

        let src = self.paths.record_file(&card.column, &card.id);
        fs::rename(&src, &dest)?;
        log::info!("[tabula.storage.archive] Archived {} to {:?}", card.id, dest);
        Ok(dest)
    }

    /// Move an archived card file back to its record path (undo of archive).
    pub fn restore_card(&self, card: &Card, from: &Path) -> Result<(), StorageError> {
        let dest = self.paths.record_file(&card.column, &card.id);
        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::rename(from, &dest)?;
        Ok(())
    }

    /// Atomically write the board file.
    pub fn save_board(&self, board: &Board) -> Result<(), StorageError> {
        let path = self.paths.board_file();
        let content = codec::serialize_board(board);
        self.self_writes.lock().unwrap().register(&path, &content);
        atomic_write(&path, &content)?;
        Ok(())
    }

    fn write_card(&self, card: &Card) -> Result<(), StorageError> {
        let path = self.paths.record_file(&card.column, &card.id);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = codec::serialize_card(card);
        self.self_writes.lock().unwrap().register(&path, &content);
        atomic_write(&path, &content)?;
        Ok(())
    }

    /// Find a card file by identity, whatever column directory it is in.
    pub fn find_record(&self, id: &str) -> Option<PathBuf> {
        let name = format!("{}.{}", id, RECORD_EXT);
        let records = self.paths.records_dir();
        for column_entry in fs::read_dir(&records).ok()? {
            let Ok(column_entry) = column_entry else {
                continue;
            };
            let candidate = column_entry.path().join(&name);
            if candidate.exists() {
                return Some(candidate);
            }
        }
        None
    }

    /// The set of card identities currently on disk.
    pub fn record_ids(&self) -> std::collections::HashSet<String> {
        let mut ids = std::collections::HashSet::new();
        let Ok(columns) = fs::read_dir(self.paths.records_dir()) else {
            return ids;
        };
        for column_entry in columns.flatten() {
            let Ok(files) = fs::read_dir(column_entry.path()) else {
                continue;
            };
            for file in files.flatten() {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.insert(stem.to_string());
                }
            }
        }
        ids
    }

    /// Check whether a watcher-reported change is one of our own writes.
    /// A match consumes the fingerprint and returns true (suppress).
    pub fn note_external_change(&self, path: &Path) -> bool {
        if let Ok(content) = fs::read_to_string(path) {
            self.self_writes
                .lock()
                .unwrap()
                .check_and_consume(path, &content)
        } else {
            false
        }
    }

    /// Periodic cleanup of stale self-write fingerprints.
    pub fn cleanup_fingerprints(&self) {
        self.self_writes.lock().unwrap().cleanup_expired();
    }
}

/// Atomic write with fsync: write to a temp name, fsync, rename, fsync the
/// directory. Refuses to replace a non-empty file with empty content.
fn atomic_write(path: &Path, content: &str) -> Result<(), std::io::Error> {
    if content.trim().is_empty() {
        if let Ok(existing) = fs::read_to_string(path) {
            if !existing.trim().is_empty() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "Refusing to overwrite non-empty file with empty content",
                ));
            }
        }
    }

    let tmp_path = path.with_extension("tabula.tmp");
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    fs::rename(&tmp_path, path)?;

    if let Some(dir) = path.parent() {
        if let Ok(d) = fs::File::open(dir) {
            let _ = d.sync_all();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{now, Column};
    use tempfile::TempDir;

    fn test_board() -> Board {
        Board {
            title: "Test".to_string(),
            columns: vec![
                Column {
                    id: "todo".to_string(),
                    name: "To Do".to_string(),
                    collapsed: false,
                },
                Column {
                    id: "done".to_string(),
                    name: "Done".to_string(),
                    collapsed: false,
                },
            ],
            labels: Vec::new(),
            template: None,
        }
    }

    fn test_card(id: &str, column: &str, position: &str) -> Card {
        let ts = now();
        Card {
            id: id.to_string(),
            title: format!("Card {}", id),
            column: column.to_string(),
            position: position.to_string(),
            created: ts,
            modified: ts,
            labels: Vec::new(),
            body: String::new(),
        }
    }

    fn test_store() -> (TempDir, LocalStore) {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        store.create_board(&test_board()).unwrap();
        (tmp, store)
    }

    #[test]
    fn test_create_board_makes_layout() {
        let (_tmp, store) = test_store();
        assert!(store.paths().board_file().exists());
        assert!(store.paths().records_dir().exists());
        assert!(store.paths().archive_dir().exists());
        assert_eq!(store.load_board().unwrap(), test_board());
    }

    #[test]
    fn test_save_and_load_cards_sorted() {
        let (_tmp, store) = test_store();
        store.create_card(&test_card("aaaa1111", "todo", "t")).unwrap();
        store.create_card(&test_card("bbbb2222", "todo", "g")).unwrap();
        store.create_card(&test_card("cccc3333", "done", "n")).unwrap();

        let cards = store.load_cards().unwrap();
        let keys: Vec<&str> = cards.iter().map(|c| c.position.as_str()).collect();
        assert_eq!(keys, vec!["g", "n", "t"]);
    }

    #[test]
    fn test_create_duplicate_id_fails() {
        let (_tmp, store) = test_store();
        let card = test_card("aaaa1111", "todo", "n");
        store.create_card(&card).unwrap();
        assert!(matches!(
            store.create_card(&card),
            Err(StorageError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_load_skips_malformed_record() {
        let (_tmp, store) = test_store();
        store.create_card(&test_card("aaaa1111", "todo", "n")).unwrap();
        // Missing the required column field.
        let bad = store.paths().records_dir().join("todo").join("bad00000.md");
        fs::write(&bad, "---\ntitle: Broken\nposition: n\n---\n").unwrap();

        let cards = store.load_cards().unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].id, "aaaa1111");
    }

    #[test]
    fn test_missing_board_file_is_hard_error() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        assert!(store.load().is_err());
    }

    #[test]
    fn test_column_change_removes_old_file() {
        let (_tmp, store) = test_store();
        let mut card = test_card("aaaa1111", "todo", "n");
        store.create_card(&card).unwrap();
        let old_path = store.paths().record_file("todo", &card.id);
        assert!(old_path.exists());

        card.column = "done".to_string();
        store.save_card(&card, Some("todo")).unwrap();
        assert!(!old_path.exists());
        assert!(store.paths().record_file("done", &card.id).exists());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_tmp, store) = test_store();
        let card = test_card("aaaa1111", "todo", "n");
        store.create_card(&card).unwrap();
        store.delete_card(&card).unwrap();
        store.delete_card(&card).unwrap();
    }

    #[test]
    fn test_archive_same_day_collision_gets_distinct_names() {
        let (_tmp, store) = test_store();
        let card = test_card("aaaa1111", "todo", "n");

        store.create_card(&card).unwrap();
        let first = store.archive_card(&card).unwrap();

        store.create_card(&card).unwrap();
        let second = store.archive_card(&card).unwrap();

        assert_ne!(first, second);
        assert!(first.exists());
        assert!(second.exists());
    }

    #[test]
    fn test_archive_and_restore() {
        let (_tmp, store) = test_store();
        let card = test_card("aaaa1111", "todo", "n");
        store.create_card(&card).unwrap();

        let archived_to = store.archive_card(&card).unwrap();
        assert!(!store.paths().record_file("todo", &card.id).exists());

        store.restore_card(&card, &archived_to).unwrap();
        assert!(store.paths().record_file("todo", &card.id).exists());
        assert!(!archived_to.exists());
    }

    #[test]
    fn test_find_record_across_columns() {
        let (_tmp, store) = test_store();
        store.create_card(&test_card("aaaa1111", "done", "n")).unwrap();
        let found = store.find_record("aaaa1111").unwrap();
        assert!(found.ends_with("records/done/aaaa1111.md"));
        assert!(store.find_record("ffff0000").is_none());
    }

    #[test]
    fn test_record_ids() {
        let (_tmp, store) = test_store();
        store.create_card(&test_card("aaaa1111", "todo", "n")).unwrap();
        store.create_card(&test_card("bbbb2222", "done", "t")).unwrap();
        let ids = store.record_ids();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("aaaa1111"));
    }

    #[test]
    fn test_atomic_write_refuses_emptying_a_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("file.md");
        atomic_write(&path, "content").unwrap();
        assert!(atomic_write(&path, "   ").is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "content");
    }

    #[test]
    fn test_self_write_fingerprints_consumed_once() {
        let (_tmp, store) = test_store();
        let card = test_card("aaaa1111", "todo", "n");
        store.create_card(&card).unwrap();

        let path = store.paths().record_file("todo", &card.id);
        assert!(store.note_external_change(&path));
        // Fingerprint consumed: a second notification is external.
        assert!(!store.note_external_change(&path));
    }
}
