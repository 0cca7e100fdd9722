/// Runtime settings for the storage core.
///
/// Constructed once at startup by the embedding application and passed by
/// reference to the components that need it; there is no global state.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Debounce window the external file watcher should apply before
    /// reporting a change batch, in milliseconds. Coalesces bursts such as
    /// those produced by a version-control checkout.
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,

    /// Interval between periodic `GitSync::sync` ticks, in seconds.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Maximum number of undo groups kept; the oldest are dropped first.
    #[serde(default = "default_undo_limit")]
    pub undo_limit: usize,

    /// Capacity of the store's event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_watch_debounce_ms() -> u64 {
    100
}

fn default_sync_interval_secs() -> u64 {
    300
}

fn default_undo_limit() -> usize {
    100
}

fn default_event_capacity() -> usize {
    256
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            watch_debounce_ms: default_watch_debounce_ms(),
            sync_interval_secs: default_sync_interval_secs(),
            undo_limit: default_undo_limit(),
            event_capacity: default_event_capacity(),
        }
    }
}
