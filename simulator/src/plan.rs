use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A replayable workload: the order in which actions are submitted to one
/// database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Plan {
    pub(crate) actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum Action {
    /// Submit a request whose body holds the connection for `hold_us`.
    Request { exclusive: bool, hold_us: u64 },
    /// Submit a barrier.
    Wait,
    /// Flip the admission mode persistently.
    Serialize,
    Parallelize,
    /// Submit `actions` inside a scoped mode change.
    Scope { serialize: bool, actions: Vec<Action> },
}

impl Plan {
    pub(crate) fn from_json_path(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|err| format!("failed to read plan file {}: {err}", path.display()))?;
        serde_json::from_str(&content)
            .map_err(|err| format!("failed to parse plan JSON {}: {err}", path.display()))
    }

    pub(crate) fn write_json_path(&self, path: &Path) -> Result<(), String> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|err| format!("failed to encode plan: {err}"))?;
        fs::write(path, content)
            .map_err(|err| format!("failed to write plan file {}: {err}", path.display()))
    }

    /// Number of requests and barriers, including those inside scopes.
    pub(crate) fn submissions(&self) -> usize {
        fn count(actions: &[Action]) -> usize {
            actions
                .iter()
                .map(|action| match action {
                    Action::Request { .. } | Action::Wait => 1,
                    Action::Scope { actions, .. } => count(actions),
                    Action::Serialize | Action::Parallelize => 0,
                })
                .sum()
        }
        count(&self.actions)
    }
}
