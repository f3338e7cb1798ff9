//! Reattach: connect a new PTY client to a detached tab's session, falling
//! back to a fresh session when the old one is gone.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::backend::SessionBackend;
use crate::lifecycle::create::spawn_session_blocking;
use crate::lifecycle::errors::LifecycleError;
use crate::lifecycle::{
    epoch_ms_string, epoch_secs, install_agent, limit, start_reader, tag_session_async,
    toast_error,
};
use crate::messages::{AgentHandoff, Message};
use crate::model::CenterPane;
use crate::tabs::{TabId, WorkspaceId};
use crate::term::pty::AgentPty;

pub fn reattach_tab(pane: &mut CenterPane, ws: &str, id: TabId) -> Result<(), LifecycleError> {
    let command = {
        let Some(tab) = pane.registry.tab_by_id(ws, id) else {
            return Err(LifecycleError::TabNotFound { id: id.to_string() });
        };
        if !tab.is_agent() {
            return Err(LifecycleError::Policy {
                operation: "reattach",
                reason: "viewer tabs have no session".to_string(),
            });
        }
        if !tab.detached {
            return Err(LifecycleError::Policy {
                operation: "reattach",
                reason: "tab is not detached".to_string(),
            });
        }
        if tab.reattach_in_flight {
            return Ok(());
        }
        pane.config.assistant_command(&tab.assistant)?
    };

    let (rows, cols) = pane.pty_size();
    let backend = pane.backend.clone();
    let sink = pane.sink.clone();

    let Some(tab) = pane.registry.tab_by_id_mut(ws, id) else {
        return Err(LifecycleError::TabNotFound { id: id.to_string() });
    };
    tab.reattach_in_flight = true;
    let session_name = tab.session_name.clone();
    let assistant = tab.assistant.clone();
    let result_ws = ws.to_string();

    info!(
        event = "core.lifecycle.reattach_started",
        ws = %result_ws,
        tab = %id,
        session = %session_name,
    );

    tokio::spawn(async move {
        let blocking_ws = result_ws.clone();
        let joined = tokio::task::spawn_blocking(move || {
            reattach_blocking(
                backend.as_ref(),
                &session_name,
                &command,
                &assistant,
                &blocking_ws,
                id,
                rows,
                cols,
            )
        })
        .await;

        let (outcome, restarted) = match joined {
            Ok(result) => result,
            Err(e) => (
                Err(LifecycleError::Internal {
                    message: format!("reattach task failed: {}", e),
                }),
                false,
            ),
        };
        sink.send(Message::PtyTabReattachResult {
            ws: result_ws,
            id,
            outcome,
            restarted,
        });
    });

    Ok(())
}

/// Attach to the session if it is alive; otherwise kill whatever is left and
/// recreate it fresh under the same name (transparent restart).
#[allow(clippy::too_many_arguments)]
pub(crate) fn reattach_blocking(
    backend: &dyn SessionBackend,
    session_name: &str,
    command: &str,
    assistant: &str,
    ws: &str,
    id: TabId,
    rows: u16,
    cols: u16,
) -> (Result<AgentHandoff, LifecycleError>, bool) {
    match backend.session_state(session_name) {
        Ok(state) if state.is_alive() => {
            let outcome = (|| {
                let agent = AgentPty::spawn(backend.attach_command(session_name), rows, cols)?;
                let captured = backend.capture_pane(session_name).unwrap_or_default();
                Ok(AgentHandoff { agent, captured })
            })();
            (outcome, false)
        }
        Ok(state) => {
            warn!(
                event = "core.lifecycle.reattach_session_gone",
                session = session_name,
                existed = state.exists,
            );
            let _ = backend.kill(session_name);
            let tags = vec![
                ("ws", ws.to_string()),
                ("tab", id.to_string()),
                ("assistant", assistant.to_string()),
                ("created_at", epoch_secs().to_string()),
            ];
            (
                spawn_session_blocking(backend, session_name, command, rows, cols, &tags),
                true,
            )
        }
        Err(e) => (Err(e.into()), false),
    }
}

/// Finish a reattach or restart once the async command reports back.
pub fn handle_reattach_result(
    pane: &mut CenterPane,
    ws: &WorkspaceId,
    id: TabId,
    outcome: Result<AgentHandoff, LifecycleError>,
    restarted: bool,
) {
    let sink = pane.sink.clone();
    let backend: Arc<dyn SessionBackend> = pane.backend.clone();
    let state_dir = pane.config.state_dir.clone();
    let (rows, cols) = pane.pty_size();

    let Some(tab) = pane.registry.tab_by_id_mut(ws, id) else {
        if let Ok(handoff) = outcome {
            handoff.agent.close();
        }
        return;
    };
    tab.reattach_in_flight = false;

    match outcome {
        Ok(handoff) => {
            // Captured scrollback is only replayed into an empty VT; a tab
            // that kept its VT across detach loses nothing and gains no
            // duplicates.
            install_agent(tab, handoff.agent, &handoff.captured, rows, cols);
            match start_reader(tab, &sink, &state_dir) {
                Ok(()) => {
                    tab.detached = false;
                    tab.restart.reset();
                    let session = tab.session_name.clone();
                    info!(
                        event = "core.lifecycle.reattach_completed",
                        ws = %ws,
                        tab = %id,
                        session = %session,
                        restarted = restarted,
                    );
                    sink.send(Message::TabReattached { ws: ws.clone(), id });
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
                    error!(event = "core.lifecycle.reattach_reader_failed", ws = %ws, tab = %id, error = %err);
                    toast_error(&sink, &err);
                    sink.send(Message::TabStateChanged { ws: ws.clone(), id });
                }
            }
        }
        Err(e) => {
            error!(event = "core.lifecycle.reattach_failed", ws = %ws, tab = %id, error = %e);
            toast_error(&sink, &e);
            sink.send(Message::TabStateChanged { ws: ws.clone(), id });
        }
    }
}
