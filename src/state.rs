use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// The only state that survives restarts: whether the primary (Monday)
/// attempt already filled this week. Losing it risks a redundant fallback
/// run, never a double spend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyCycleState {
    #[serde(default)]
    pub monday_attempt_successful: bool,
}

/// Durable store for [`WeeklyCycleState`]. Reads never fail and writes are
/// best-effort; both degrade to log lines.
pub struct CycleStateStore {
    path: PathBuf,
}

impl CycleStateStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Load the persisted state, falling back to the default on a missing,
    /// unreadable, or structurally invalid file.
    pub fn load(&self) -> WeeklyCycleState {
        match fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(state) => state,
                Err(e) => {
                    warn!("Invalid state file {}: {}", self.path.display(), e);
                    WeeklyCycleState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => WeeklyCycleState::default(),
            Err(e) => {
                warn!("Could not read state file {}: {}", self.path.display(), e);
                WeeklyCycleState::default()
            }
        }
    }

    /// Persist by serialize-then-replace: write a sibling temp file, then
    /// rename it over the target so readers never observe a partial write.
    pub fn save(&self, state: &WeeklyCycleState) {
        let json = match serde_json::to_string_pretty(state) {
            Ok(json) => json,
            Err(e) => {
                warn!("Could not serialize state: {}", e);
                return;
            }
        };

        let tmp = self.path.with_extension("tmp");
        if let Err(e) = fs::write(&tmp, json) {
            warn!("Could not write state file {}: {}", tmp.display(), e);
            return;
        }
        if let Err(e) = fs::rename(&tmp, &self.path) {
            warn!("Could not replace state file {}: {}", self.path.display(), e);
        }
    }
}
