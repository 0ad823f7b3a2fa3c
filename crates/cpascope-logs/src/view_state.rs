//! Log viewer state persisted between sessions
//!
//! Best effort: a missing or unreadable file yields the defaults and write
//! failures are ignored.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::LogFilter;

const VIEW_STATE_FILE: &str = "log-view-state.json";

/// Search and filter choices of the log viewer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewState {
    pub filter: LogFilter,

    /// Keep following new lines
    pub stick_to_bottom: bool,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            filter: LogFilter::new().with_hide_management(true),
            stick_to_bottom: true,
        }
    }
}

impl ViewState {
    /// Get the state file path
    pub fn default_path() -> Option<PathBuf> {
        let cache_dir = dirs::cache_dir()?;
        Some(cache_dir.join("cpascope").join(VIEW_STATE_FILE))
    }

    /// Load the state from the default location
    pub fn load() -> Self {
        Self::default_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    /// Save the state to the default location
    pub fn save(&self) {
        if let Some(path) = Self::default_path() {
            self.save_to(&path);
        }
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(self) {
            Ok(content) => {
                if let Err(err) = fs::write(path, content) {
                    tracing::debug!(error = %err, path = %path.display(), "view state not saved");
                }
            }
            Err(err) => tracing::debug!(error = %err, "view state not serialized"),
        }
    }
}
