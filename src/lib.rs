//! Storage core of the Tabula board: a local-first, git-friendly
//! persistence and synchronization engine for a directory of human-readable
//! card files.
//!
//! The pieces, leaf to root:
//! - [`codec`]: round-trips cards and the board file to/from text
//! - [`position`]: conflict-free ordering keys (plain string sort order)
//! - [`storage`]: atomic file persistence, one file per card, archival
//! - [`store`]: the authoritative in-memory collection: mutations,
//!   grouped undo/redo, reconciliation of external edits
//! - [`sync`]: git status detection, safe auto-pull, gated push
//!
//! The UI, the filesystem watcher, and the periodic timer are external
//! collaborators: the watcher feeds [`Store::apply_changes`] with debounced
//! path batches, the timer drives [`GitSync::sync`].

pub mod codec;
pub mod config;
pub mod identity;
pub mod position;
pub mod search;
pub mod storage;
pub mod store;
pub mod sync;
pub mod types;
pub mod watcher;

mod undo;

pub use config::Settings;
pub use storage::{BoardPaths, LocalStore, PathKind, StorageError};
pub use store::{Store, StoreError, StoreEvent};
pub use sync::{GitSync, SyncError, SyncStatus};
pub use types::{Board, Card, Column, Label};
