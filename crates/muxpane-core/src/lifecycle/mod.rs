//! Tab lifecycle controller: create, detach, reattach, restart, close, and
//! the attached-tab limit.
//!
//! Operations mutate registry state synchronously and push the blocking
//! backend work (session spawn, state checks, pane capture) onto async
//! commands whose results come back as messages; the update loop finishes
//! the transition when the result arrives.

pub mod close;
pub mod create;
pub mod detach;
pub mod errors;
pub mod limit;
pub mod reattach;
pub mod restart;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::SessionBackend;
use crate::errors::CoreError;
use crate::messages::{Message, MsgSink, ToastLevel};
use crate::reader::trace::{TraceFile, trace_enabled};
use crate::reader::{ReaderSpawn, now_ns, spawn_reader};
use crate::tabs::Tab;
use crate::term::errors::PtyError;
use crate::term::pty::AgentPty;
use crate::term::vt::VtScreen;

pub use errors::LifecycleError;

pub(crate) fn epoch_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

pub(crate) fn epoch_ms_string() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

/// Stop a tab's reader pipeline. Closes the cancel handle idempotently,
/// awaits nothing, and clears `running` so `running ⇒ reader_active` holds.
pub(crate) fn stop_reader(tab: &mut Tab) {
    if let Some(handle) = tab.reader.take() {
        handle.stop();
        debug!(
            event = "core.lifecycle.reader_stopped",
            ws = %tab.workspace_id,
            tab = %tab.id,
            seq = handle.seq,
        );
    }
    tab.running = false;
}

/// Start a reader for the tab's current agent. The heartbeat is freshened
/// first so the stall supervisor does not cancel a reader that has not had
/// a chance to read yet.
pub(crate) fn start_reader(
    tab: &mut Tab,
    sink: &MsgSink,
    state_dir: &Path,
) -> Result<(), PtyError> {
    stop_reader(tab);

    let pty_reader = {
        let inner = tab.shared.lock();
        let agent = inner.agent.as_ref().ok_or(PtyError::Open {
            message: "no agent attached".to_string(),
        })?;
        agent.clone_reader()?
    };

    let trace = if trace_enabled(&tab.assistant) {
        TraceFile::create(
            &state_dir.join("trace"),
            &tab.workspace_id,
            &tab.id.to_string(),
        )
    } else {
        None
    };

    let seq = tab.next_reader_seq();
    tab.shared.beat(now_ns());
    tab.reader = Some(spawn_reader(ReaderSpawn {
        ws: tab.workspace_id.clone(),
        id: tab.id,
        seq,
        pty_reader,
        shared: Arc::downgrade(&tab.shared),
        sink: sink.clone(),
        trace,
    }));
    tab.running = true;
    Ok(())
}

/// Install a freshly attached agent into the tab's shared state: size the
/// PTY, create or resize the VT, seed captured scrollback into a fresh VT,
/// and wire the response writer through a weak handle so the VT never keeps
/// a dead agent alive.
pub(crate) fn install_agent(tab: &mut Tab, agent: AgentPty, captured: &[u8], rows: u16, cols: u16) {
    let mut inner = tab.shared.lock();

    if let Err(e) = agent.set_size(rows, cols) {
        warn!(event = "core.lifecycle.install_resize_failed", error = %e);
    }
    inner.pty_rows = rows;
    inner.pty_cols = cols;

    let vt = inner.vt.get_or_insert_with(|| VtScreen::new(cols, rows));
    vt.resize(cols, rows);
    if vt.is_empty() && !captured.is_empty() {
        vt.prepend_scrollback(captured);
    }

    let writer = agent.writer_handle();
    vt.set_response_writer(Box::new(move |bytes| {
        let _ = writer.write(bytes);
    }));

    inner.agent = Some(agent);
}

/// Stamp a session tag without blocking the update loop.
pub(crate) fn tag_session_async(
    backend: Arc<dyn SessionBackend>,
    name: String,
    key: &'static str,
    value: String,
) {
    if name.is_empty() {
        return;
    }
    tokio::task::spawn_blocking(move || {
        if let Err(e) = backend.set_session_tag(&name, key, &value) {
            debug!(event = "core.lifecycle.tag_failed", session = %name, key = key, error = %e);
        }
    });
}

pub(crate) fn toast(sink: &MsgSink, level: ToastLevel, text: impl Into<String>) {
    sink.send(Message::Toast {
        level,
        text: text.into(),
    });
}

/// Toast an error at the severity its kind implies: user errors (policy,
/// config) are informational, everything else is a warning.
pub(crate) fn toast_error(sink: &MsgSink, err: &LifecycleError) {
    let level = if err.is_user_error() {
        ToastLevel::Info
    } else {
        ToastLevel::Warn
    };
    toast(sink, level, err.to_string());
}
