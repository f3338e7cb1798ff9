//! Tab creation: allocate the tab, spawn the multiplexer session under a
//! PTY, and finish the attach when the async result lands.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::backend::SessionBackend;
use crate::lifecycle::errors::LifecycleError;
use crate::lifecycle::{
    epoch_ms_string, epoch_secs, install_agent, limit, start_reader, tag_session_async,
    toast_error,
};
use crate::messages::{AgentHandoff, Message};
use crate::model::CenterPane;
use crate::tabs::{Tab, TabId, WorkspaceId};
use crate::term::pty::AgentPty;

/// How long the spawn command gets to register its session with the backend
/// before tagging and capture are skipped.
const SESSION_VISIBLE_TIMEOUT: Duration = Duration::from_secs(2);
const SESSION_VISIBLE_POLL: Duration = Duration::from_millis(100);

/// Create an agent tab in the current workspace and focus it.
///
/// The session spawn happens asynchronously; a `PtyTabCreateResult` message
/// completes (or fails) the attach.
pub fn create_agent_tab(
    pane: &mut CenterPane,
    assistant: &str,
) -> Result<TabId, LifecycleError> {
    let command = pane.config.assistant_command(assistant)?;

    let ws = pane.workspace.clone();
    let id = TabId::next();
    let session_name =
        pane.backend
            .session_name(&pane.config.session_prefix, &ws, &id.to_string());
    let created_at = epoch_secs();

    info!(
        event = "core.lifecycle.create_started",
        ws = %ws,
        tab = %id,
        assistant = assistant,
        session = %session_name,
    );

    pane.registry
        .push_tab(Tab::new(id, ws.clone(), assistant, session_name.clone(), created_at));
    let index = pane.registry.tabs(&ws).len() - 1;
    pane.registry.set_active_index(&ws, index, created_at);

    let tags = vec![
        ("ws", ws.clone()),
        ("tab", id.to_string()),
        ("assistant", assistant.to_string()),
        ("created_at", created_at.to_string()),
    ];
    let backend = pane.backend.clone();
    let sink = pane.sink.clone();
    let (rows, cols) = pane.pty_size();
    let result_ws = ws.clone();

    tokio::spawn(async move {
        let outcome = run_spawn_session(backend, session_name, command, rows, cols, tags).await;
        sink.send(Message::PtyTabCreateResult {
            ws: result_ws,
            id,
            outcome,
        });
    });

    Ok(id)
}

/// Create a viewer-class tab (diff or file viewer) and focus it. Viewer
/// tabs have no PTY session and never detach or reattach.
pub fn create_viewer_tab(
    pane: &mut CenterPane,
    kind: &str,
    title: &str,
    mut viewer: Box<dyn crate::viewer::Viewer>,
) -> TabId {
    let ws = pane.workspace.clone();
    let id = TabId::next();

    let mut tab = Tab::new(id, ws.clone(), kind, String::new(), epoch_secs());
    tab.title = title.to_string();
    if let Some(msg) = viewer.init() {
        pane.sink.send(msg);
    }
    tab.shared.lock().viewer = Some(viewer);
    pane.registry.push_tab(tab);

    let index = pane.registry.tabs(&ws).len() - 1;
    pane.registry.set_active_index(&ws, index, epoch_secs());
    info!(event = "core.lifecycle.viewer_tab_created", ws = %ws, tab = %id, kind = kind);
    pane.sink.send(Message::TabCreated { ws, id });
    id
}

/// Run [`spawn_session_blocking`] off the update loop.
pub(crate) async fn run_spawn_session(
    backend: Arc<dyn SessionBackend>,
    name: String,
    command: String,
    rows: u16,
    cols: u16,
    tags: Vec<(&'static str, String)>,
) -> Result<AgentHandoff, LifecycleError> {
    match tokio::task::spawn_blocking(move || {
        spawn_session_blocking(backend.as_ref(), &name, &command, rows, cols, &tags)
    })
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => Err(LifecycleError::Internal {
            message: format!("session spawn task failed: {}", e),
        }),
    }
}

/// Spawn (or attach-or-create) a session under a fresh PTY, wait for the
/// backend to see it, tag it, and capture any pre-existing pane contents.
pub(crate) fn spawn_session_blocking(
    backend: &dyn SessionBackend,
    name: &str,
    command: &str,
    rows: u16,
    cols: u16,
    tags: &[(&'static str, String)],
) -> Result<AgentHandoff, LifecycleError> {
    let agent = AgentPty::spawn(backend.spawn_command(name, command), rows, cols)?;

    // The PTY client registers the session asynchronously; poll until the
    // backend can see it so tags and capture have a target.
    let mut visible = false;
    let deadline = std::time::Instant::now() + SESSION_VISIBLE_TIMEOUT;
    loop {
        if backend
            .session_state(name)
            .map(|s| s.exists)
            .unwrap_or(false)
        {
            visible = true;
            break;
        }
        if std::time::Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(SESSION_VISIBLE_POLL);
    }

    let mut captured = Vec::new();
    if visible {
        for (key, value) in tags {
            if let Err(e) = backend.set_session_tag(name, key, value) {
                warn!(event = "core.lifecycle.create_tag_failed", session = name, key = key, error = %e);
                break;
            }
        }
        captured = backend.capture_pane(name).unwrap_or_default();
    } else {
        warn!(event = "core.lifecycle.session_not_visible", session = name);
    }

    Ok(AgentHandoff { agent, captured })
}

/// Finish a creation: install the agent, start the reader, announce the tab.
pub fn handle_create_result(
    pane: &mut CenterPane,
    ws: &WorkspaceId,
    id: TabId,
    outcome: Result<AgentHandoff, LifecycleError>,
) {
    let sink = pane.sink.clone();
    let backend = pane.backend.clone();
    let state_dir = pane.config.state_dir.clone();
    let (rows, cols) = pane.pty_size();

    let Some(tab) = pane.registry.tab_by_id_mut(ws, id) else {
        // Tab closed while the spawn was in flight; drop the result.
        if let Ok(handoff) = outcome {
            handoff.agent.close();
        }
        return;
    };

    match outcome {
        Ok(handoff) => {
            install_agent(tab, handoff.agent, &handoff.captured, rows, cols);
            match start_reader(tab, &sink, &state_dir) {
                Ok(()) => {
                    tab.detached = false;
                    tab.restart.reset();
                    let session = tab.session_name.clone();
                    info!(
                        event = "core.lifecycle.create_completed",
                        ws = %ws,
                        tab = %id,
                        session = %session,
                    );
                    sink.send(Message::TabCreated { ws: ws.clone(), id });
                    tag_session_async(backend, session, "session_lease_at", epoch_ms_string());
                    limit::enforce_attached_limit(pane);
                }
                Err(e) => {
                    {
                        let mut inner = tab.shared.lock();
                        if let Some(agent) = inner.agent.take() {
                            agent.close();
                        }
                    }
                    tab.detached = true;
                    let err: LifecycleError = e.into();
                    error!(event = "core.lifecycle.create_reader_failed", ws = %ws, tab = %id, error = %err);
                    toast_error(&sink, &err);
                    sink.send(Message::TabStateChanged { ws: ws.clone(), id });
                }
            }
        }
        Err(e) => {
            tab.running = false;
            error!(event = "core.lifecycle.create_failed", ws = %ws, tab = %id, error = %e);
            toast_error(&sink, &e);
            sink.send(Message::TabStateChanged { ws: ws.clone(), id });
        }
    }
}
