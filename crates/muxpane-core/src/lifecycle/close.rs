//! Close: two-phase teardown of a tab and best-effort session kill.
//!
//! `closing` is latched first so lookups (and therefore event delivery)
//! stop immediately; resources are torn down; `closed` is latched; only
//! then is the tab removed from its slice. Flush ticks or reader output
//! still in flight resolve to nothing.

use tracing::info;

use crate::lifecycle::errors::LifecycleError;
use crate::lifecycle::stop_reader;
use crate::messages::Message;
use crate::model::CenterPane;
use crate::tabs::TabId;

pub fn close_tab(pane: &mut CenterPane, ws: &str, id: TabId) -> Result<(), LifecycleError> {
    let backend = pane.backend.clone();
    let sink = pane.sink.clone();

    let Some(index) = pane.registry.index_of(ws, id) else {
        return Err(LifecycleError::TabNotFound { id: id.to_string() });
    };

    let (session_name, kill_session) = {
        let tabs = pane
            .registry
            .tabs_mut(ws)
            .ok_or(LifecycleError::TabNotFound { id: id.to_string() })?;
        let tab = &mut tabs[index];

        tab.closing = true;
        stop_reader(tab);
        {
            let mut inner = tab.shared.lock();
            if let Some(agent) = inner.agent.take() {
                agent.close();
            }
            inner.vt = None;
            inner.viewer = None;
        }
        tab.pending.clear();
        tab.flush_scheduled = false;
        tab.detached = false;
        tab.closed = true;

        (tab.session_name.clone(), tab.is_agent())
    };

    pane.registry.remove_tab(ws, index);
    pane.invalidate_snapshot_cache();

    if kill_session && !session_name.is_empty() {
        let kill_name = session_name.clone();
        tokio::task::spawn_blocking(move || {
            let _ = backend.kill(&kill_name);
        });
    }

    info!(
        event = "core.lifecycle.close_completed",
        ws = %ws,
        tab = %id,
        session = %session_name,
    );
    sink.send(Message::TabClosed {
        ws: ws.to_string(),
        id,
    });
    Ok(())
}
