/// Support types for consuming an external file watcher.
///
/// The watcher itself (filesystem-event subscription, debouncing) is an
/// external collaborator. This module only holds what the core needs to make
/// sense of its notifications: content fingerprints for telling our own
/// writes apart from external ones.
pub mod self_write;
pub mod types;

pub use self_write::SelfWriteTracker;
pub use types::ContentFingerprint;
