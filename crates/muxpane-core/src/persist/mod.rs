//! Workspace snapshot persistence.
//!
//! The host stores one snapshot per workspace; restoring recreates tabs as
//! detached placeholders and schedules reattach commands for every entry
//! that was not stopped. Tab ids are process-local and never persisted; the
//! session name is the durable identity.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::CoreError;
use crate::lifecycle;
use crate::model::CenterPane;
use crate::tabs::{Tab, TabId, TabStatus};

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("Failed to read snapshot '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to write snapshot '{path}': {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("Snapshot '{path}' is not valid JSON: {message}")]
    Malformed { path: String, message: String },
}

impl CoreError for PersistError {
    fn error_code(&self) -> &'static str {
        match self {
            PersistError::Read { .. } => "PERSIST_READ",
            PersistError::Write { .. } => "PERSIST_WRITE",
            PersistError::Malformed { .. } => "PERSIST_MALFORMED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenTabEntry {
    pub assistant: String,
    pub name: String,
    pub session_name: String,
    pub status: TabStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WorkspaceSnapshot {
    pub open_tabs: Vec<OpenTabEntry>,
    pub active_tab_index: usize,
}

/// Project a workspace's tabs into a snapshot.
pub fn save_workspace(pane: &CenterPane, ws: &str) -> WorkspaceSnapshot {
    let open_tabs = pane
        .registry()
        .tabs(ws)
        .iter()
        .filter(|t| !t.closing && !t.closed)
        .map(|t| OpenTabEntry {
            assistant: t.assistant.clone(),
            name: t.title.clone(),
            session_name: t.session_name.clone(),
            status: t.status(),
            created_at: t.created_at,
        })
        .collect();

    WorkspaceSnapshot {
        open_tabs,
        active_tab_index: pane.registry().active_index(ws),
    }
}

/// Recreate a workspace's tabs from a snapshot.
///
/// Entries come back as placeholders: stopped entries stay stopped, all
/// others start detached and get an async reattach scheduled. Unknown
/// assistants leave their placeholder detached with an info toast.
pub fn restore_workspace(pane: &mut CenterPane, ws: &str, snapshot: &WorkspaceSnapshot) {
    info!(
        event = "core.persist.restore_started",
        ws = ws,
        tabs = snapshot.open_tabs.len(),
    );

    let mut restored: Vec<TabId> = Vec::new();
    for entry in &snapshot.open_tabs {
        let id = TabId::next();
        let mut tab = Tab::new(
            id,
            ws.to_string(),
            &entry.assistant,
            entry.session_name.clone(),
            entry.created_at,
        );
        tab.title = entry.name.clone();
        tab.detached = entry.status != TabStatus::Stopped;
        pane.registry.push_tab(tab);
        restored.push(id);

        if entry.status != TabStatus::Stopped {
            if let Err(e) = lifecycle::reattach::reattach_tab(pane, ws, id) {
                warn!(
                    event = "core.persist.restore_reattach_failed",
                    ws = ws,
                    session = %entry.session_name,
                    error = %e,
                );
                lifecycle::toast_error(&pane.sink, &e);
            }
        }
    }

    let index = snapshot
        .active_tab_index
        .min(restored.len().saturating_sub(1));
    pane.registry
        .set_active_index(ws, index, lifecycle::epoch_secs());
}

/// Where a workspace's snapshot lives under the pane state directory.
pub fn snapshot_path(state_dir: &Path, ws: &str) -> PathBuf {
    let safe: String = ws
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    state_dir.join("workspaces").join(format!("{}.json", safe))
}

pub fn save_to_disk(pane: &CenterPane, ws: &str) -> Result<(), PersistError> {
    let snapshot = save_workspace(pane, ws);
    let path = snapshot_path(pane.config().state_dir.as_path(), ws);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| PersistError::Write {
            path: path.display().to_string(),
            source,
        })?;
    }
    let json = serde_json::to_string_pretty(&snapshot).map_err(|e| PersistError::Malformed {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    std::fs::write(&path, json).map_err(|source| PersistError::Write {
        path: path.display().to_string(),
        source,
    })?;
    debug!(event = "core.persist.saved", ws = ws, path = %path.display());
    Ok(())
}

/// Load a workspace snapshot. A missing file is `Ok(None)`.
pub fn load_from_disk(state_dir: &Path, ws: &str) -> Result<Option<WorkspaceSnapshot>, PersistError> {
    let path = snapshot_path(state_dir, ws);
    let json = match std::fs::read_to_string(&path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistError::Read {
                path: path.display().to_string(),
                source,
            });
        }
    };
    serde_json::from_str(&json)
        .map(Some)
        .map_err(|e| PersistError::Malformed {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::backend::fake::FakeBackend;
    use crate::config::PaneConfig;
    use crate::messages::Message;
    use crate::model::CenterPane;

    fn entry(assistant: &str, session: &str, status: TabStatus, created_at: i64) -> OpenTabEntry {
        OpenTabEntry {
            assistant: assistant.to_string(),
            name: format!("{} tab", assistant),
            session_name: session.to_string(),
            status,
            created_at,
        }
    }

    #[tokio::test]
    async fn test_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = PaneConfig {
            state_dir: dir.path().to_path_buf(),
            ..PaneConfig::default()
        };
        let (mut pane, _rx) = CenterPane::new_for_test(
            config,
            Arc::new(FakeBackend::new()),
            "my ws".to_string(),
        );

        let snapshot = WorkspaceSnapshot {
            open_tabs: vec![entry("claude", "mp-ws-4", TabStatus::Stopped, 10)],
            active_tab_index: 0,
        };
        restore_workspace(&mut pane, "my ws", &snapshot);
        save_to_disk(&pane, "my ws").unwrap();

        let loaded = load_from_disk(dir.path(), "my ws").unwrap().unwrap();
        assert_eq!(loaded, snapshot);

        // Missing workspaces load as None.
        assert!(load_from_disk(dir.path(), "absent").unwrap().is_none());
    }

    #[test]
    fn test_snapshot_path_sanitizes_workspace() {
        let path = snapshot_path(Path::new("/tmp/state"), "my ws/1");
        assert_eq!(
            path,
            Path::new("/tmp/state/workspaces/my_ws_1.json")
        );
    }

    #[test]
    fn test_snapshot_serde_round_trip() {
        let snapshot = WorkspaceSnapshot {
            open_tabs: vec![
                entry("claude", "mp-ws-1", TabStatus::Running, 100),
                entry("claude", "mp-ws-2", TabStatus::Stopped, 200),
            ],
            active_tab_index: 1,
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"running\""));
        assert!(json.contains("\"stopped\""));
        let parsed: WorkspaceSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[tokio::test]
    async fn test_restore_recreates_placeholders_in_order() {
        let (mut pane, _rx) = CenterPane::new_for_test(
            PaneConfig::default(),
            Arc::new(FakeBackend::with_state(false, false)),
            "ws".to_string(),
        );

        let snapshot = WorkspaceSnapshot {
            open_tabs: vec![
                entry("claude", "mp-ws-1", TabStatus::Stopped, 100),
                entry("claude", "mp-ws-2", TabStatus::Detached, 200),
            ],
            active_tab_index: 1,
        };
        restore_workspace(&mut pane, "ws", &snapshot);

        let tabs = pane.registry().tabs("ws");
        assert_eq!(tabs.len(), 2);
        assert_eq!(tabs[0].session_name, "mp-ws-1");
        assert_eq!(tabs[0].status(), TabStatus::Stopped);
        assert_eq!(tabs[1].session_name, "mp-ws-2");
        assert_eq!(tabs[1].status(), TabStatus::Detached);
        assert!(tabs[1].reattach_in_flight, "reattach scheduled");
        assert_eq!(tabs[0].created_at, 100);
        assert_eq!(pane.registry().active_index("ws"), 1);
    }

    #[tokio::test]
    async fn test_running_tab_round_trips_through_reattach() {
        let (mut pane, mut rx) = CenterPane::new_for_test(
            PaneConfig::default(),
            Arc::new(FakeBackend::new()),
            "ws".to_string(),
        );

        let saved = WorkspaceSnapshot {
            open_tabs: vec![entry("claude", "mp-ws-9", TabStatus::Running, 42)],
            active_tab_index: 0,
        };
        restore_workspace(&mut pane, "ws", &saved);

        // Pump messages until the reattach result lands.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let timeout = deadline - tokio::time::Instant::now();
            let msg = tokio::time::timeout(timeout, rx.recv())
                .await
                .expect("reattach result never arrived")
                .expect("sink closed");
            let was_result = matches!(msg, Message::PtyTabReattachResult { .. });
            pane.update(msg);
            if was_result {
                break;
            }
        }

        let roundtripped = save_workspace(&pane, "ws");
        assert_eq!(roundtripped.open_tabs.len(), 1);
        assert_eq!(roundtripped.open_tabs[0].session_name, "mp-ws-9");
        assert_eq!(roundtripped.open_tabs[0].status, TabStatus::Running);
        assert_eq!(roundtripped.open_tabs[0].created_at, 42);
        assert_eq!(roundtripped.active_tab_index, 0);

        pane.shutdown();
    }

    #[tokio::test]
    async fn test_restore_unknown_assistant_stays_detached_with_toast() {
        let (mut pane, mut rx) = CenterPane::new_for_test(
            PaneConfig::default(),
            Arc::new(FakeBackend::new()),
            "ws".to_string(),
        );

        let snapshot = WorkspaceSnapshot {
            open_tabs: vec![entry("mystery", "mp-ws-3", TabStatus::Detached, 7)],
            active_tab_index: 0,
        };
        restore_workspace(&mut pane, "ws", &snapshot);

        let tabs = pane.registry().tabs("ws");
        assert_eq!(tabs[0].status(), TabStatus::Detached);
        assert!(!tabs[0].reattach_in_flight);

        let mut saw_toast = false;
        while let Ok(msg) = rx.try_recv() {
            if matches!(msg, Message::Toast { .. }) {
                saw_toast = true;
            }
        }
        assert!(saw_toast, "unknown assistant surfaces a toast");
    }
}
