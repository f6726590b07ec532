//! Configuration types for the playback runtime.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime configuration loaded from YAML. Every field has a default, so an
/// empty document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChimeConfig {
    /// Search roots for relative sound paths, tried in order.
    pub sound_dirs: Vec<PathBuf>,
    /// Cadence of the periodic time callbacks delivered to sound bindings.
    pub tick_interval_ms: u64,
    /// Volume used when a caller does not give one (0.0 - 1.0).
    pub default_volume: f64,
    /// Name of the coordination thread that owns observable state.
    pub coordinator_thread: String,
    /// Name of the background thread that prepares fire-and-forget sounds.
    pub background_thread: String,
}

impl Default for ChimeConfig {
    fn default() -> Self {
        Self {
            sound_dirs: Vec::new(),
            tick_interval_ms: 500,
            default_volume: 1.0,
            coordinator_thread: "chime-coordinator".to_string(),
            background_thread: "chime-background".to_string(),
        }
    }
}

impl ChimeConfig {
    /// Returns the tick cadence as a `Duration`.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
