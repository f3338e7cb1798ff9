//! Restart: unconditionally kill the session and recreate it fresh under
//! the same name. Permitted only for tabs that are not running.

use tracing::info;

use crate::lifecycle::create::spawn_session_blocking;
use crate::lifecycle::errors::LifecycleError;
use crate::lifecycle::epoch_secs;
use crate::messages::Message;
use crate::model::CenterPane;
use crate::tabs::TabId;

pub fn restart_tab(pane: &mut CenterPane, ws: &str, id: TabId) -> Result<(), LifecycleError> {
    let command = {
        let Some(tab) = pane.registry.tab_by_id(ws, id) else {
            return Err(LifecycleError::TabNotFound { id: id.to_string() });
        };
        if !tab.is_agent() {
            return Err(LifecycleError::Policy {
                operation: "restart",
                reason: "viewer tabs have no session".to_string(),
            });
        }
        if tab.running {
            return Err(LifecycleError::Policy {
                operation: "restart",
                reason: "tab is still running".to_string(),
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
        event = "core.lifecycle.restart_started",
        ws = %result_ws,
        tab = %id,
        session = %session_name,
    );

    tokio::spawn(async move {
        let blocking_ws = result_ws.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let _ = backend.kill(&session_name);
            let tags = vec![
                ("ws", blocking_ws),
                ("tab", id.to_string()),
                ("assistant", assistant),
                ("created_at", epoch_secs().to_string()),
            ];
            spawn_session_blocking(backend.as_ref(), &session_name, &command, rows, cols, &tags)
        })
        .await;

        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => Err(LifecycleError::Internal {
                message: format!("restart task failed: {}", e),
            }),
        };
        sink.send(Message::PtyTabReattachResult {
            ws: result_ws,
            id,
            outcome,
            restarted: true,
        });
    });

    Ok(())
}
