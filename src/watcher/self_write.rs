/// Tells the persistence layer's own writes apart from external ones.
///
/// Before every atomic write the layer registers a fingerprint of the
/// content it is about to produce. When the external watcher later reports
/// that path, the reconciler reads the file and checks it against the
/// pending fingerprints: a match is consumed and the notification suppressed
/// (it was our own write); no match means another process changed the file.
/// The TTL is cleanup only; a matching fingerprint is consumed regardless
/// of age.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::types::ContentFingerprint;

const FINGERPRINT_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
pub struct SelfWriteTracker {
    /// path -> pending fingerprints; several writes can land before the
    /// watcher fires once.
    pending: HashMap<PathBuf, Vec<(ContentFingerprint, Instant)>>,
}

impl SelfWriteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the content about to be written to `path`.
    pub fn register(&mut self, path: &Path, content: &str) {
        let fingerprint = ContentFingerprint::from_content(content);
        self.pending
            .entry(path.to_path_buf())
            .or_default()
            .push((fingerprint, Instant::now()));
    }

    /// Check whether the current on-disk content of `path` matches a pending
    /// self-write. A match is consumed and returns true (suppress); no match
    /// returns false (external change, reconcile).
    pub fn check_and_consume(&mut self, path: &Path, current_content: &str) -> bool {
        let fingerprint = ContentFingerprint::from_content(current_content);
        if let Some(entries) = self.pending.get_mut(path) {
            if let Some(pos) = entries.iter().position(|(fp, _)| *fp == fingerprint) {
                entries.remove(pos);
                if entries.is_empty() {
                    self.pending.remove(path);
                }
                return true;
            }
        }
        false
    }

    /// Drop fingerprints older than the TTL. Housekeeping, not correctness.
    pub fn cleanup_expired(&mut self) {
        let now = Instant::now();
        self.pending.retain(|_, entries| {
            entries.retain(|(_, at)| now.duration_since(*at) < FINGERPRINT_TTL);
            !entries.is_empty()
        });
    }

    pub fn has_pending(&self, path: &Path) -> bool {
        self.pending.get(path).is_some_and(|e| !e.is_empty())
    }
}
