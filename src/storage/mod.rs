pub mod local;

use std::path::{Path, PathBuf};

use crate::codec::CodecError;

pub use local::LocalStore;

/// Board file name at the collection root.
pub const BOARD_FILE: &str = "board.md";
/// Directory holding one subdirectory per column.
pub const RECORDS_DIR: &str = "records";
/// Side store for archived cards.
pub const ARCHIVE_DIR: &str = "archive";
/// Extension of card and board files.
pub const RECORD_EXT: &str = "md";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("card already exists: {0}")]
    DuplicateId(String),

    #[error("invalid board file {path:?}: {source}")]
    InvalidBoard {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a filesystem path means inside a board directory. Used to dispatch
/// watcher notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathKind {
    Board,
    Record { column: String, id: String },
    Other,
}

/// Deterministic path layout for one board directory.
#[derive(Debug, Clone)]
pub struct BoardPaths {
    root: PathBuf,
}

impl BoardPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::fs::canonicalize(&root).unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn board_file(&self) -> PathBuf {
        self.root.join(BOARD_FILE)
    }

    pub fn records_dir(&self) -> PathBuf {
        self.root.join(RECORDS_DIR)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join(ARCHIVE_DIR)
    }

    pub fn record_file(&self, column: &str, id: &str) -> PathBuf {
        self.records_dir()
            .join(column)
            .join(format!("{}.{}", id, RECORD_EXT))
    }

    /// Classify a path reported by the external watcher.
    pub fn classify(&self, path: &Path) -> PathKind {
        let canonical;
        let rel = match path.strip_prefix(&self.root) {
            Ok(rel) => rel,
            Err(_) => {
                canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
                match canonical.strip_prefix(&self.root) {
                    Ok(rel) => rel,
                    Err(_) => return PathKind::Other,
                }
            }
        };

        let parts: Vec<&str> = rel
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect();
        match parts.as_slice() {
            [name] if *name == BOARD_FILE => PathKind::Board,
            [dir, column, file] if *dir == RECORDS_DIR => {
                let file = Path::new(file);
                if file.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                    return PathKind::Other;
                }
                match file.file_stem().and_then(|s| s.to_str()) {
                    Some(stem) => PathKind::Record {
                        column: column.to_string(),
                        id: stem.to_string(),
                    },
                    None => PathKind::Other,
                }
            }
            _ => PathKind::Other,
        }
    }
}
