//! Detach: close the PTY client, keep the multiplexer session alive.

use tracing::info;

use crate::lifecycle::errors::LifecycleError;
use crate::lifecycle::stop_reader;
use crate::messages::{Message, MsgSink};
use crate::model::CenterPane;
use crate::tabs::{Tab, TabId};

pub fn detach_tab(pane: &mut CenterPane, ws: &str, id: TabId) -> Result<(), LifecycleError> {
    let sink = pane.sink.clone();
    let Some(tab) = pane.registry.tab_by_id_mut(ws, id) else {
        return Err(LifecycleError::TabNotFound { id: id.to_string() });
    };
    if !tab.is_agent() {
        return Err(LifecycleError::Policy {
            operation: "detach",
            reason: "viewer tabs have no session".to_string(),
        });
    }
    if tab.detached || !tab.running {
        // Already detached, or stopped with nothing to let go of.
        return Ok(());
    }

    detach_tab_inner(tab, &sink);
    Ok(())
}

/// Shared detach mechanics, also used by the attached-tab limit.
pub(crate) fn detach_tab_inner(tab: &mut Tab, sink: &MsgSink) {
    stop_reader(tab);
    {
        let mut inner = tab.shared.lock();
        if let Some(agent) = inner.agent.take() {
            agent.close();
        }
    }
    tab.running = false;
    tab.detached = true;

    info!(
        event = "core.lifecycle.detach_completed",
        ws = %tab.workspace_id,
        tab = %tab.id,
        session = %tab.session_name,
    );
    sink.send(Message::TabDetached {
        ws: tab.workspace_id.clone(),
        id: tab.id,
    });
}
