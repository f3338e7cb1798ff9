//! The tab actor: a single-consumer task serializing every mutation that
//! touches a tab's VT or selection, including VT writes from the flush
//! engine. The VT is effectively single-threaded from its own perspective.
//!
//! The update loop owns the producing side. While the actor is ready it
//! enqueues [`TabEvent`]s; when the actor is not ready (startup, stalled
//! heartbeat) it calls [`handle_event`] directly under the tab mutex. Both
//! paths run the same handler.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::messages::{Message, MsgSink, TabEvent, TabEventKind};
use crate::tabs::{TabId, TabShared, WorkspaceId};

/// Actor inbox depth.
pub const ACTOR_CHANNEL_CAP: usize = 4096;
/// Cadence of `TabActorHeartbeat`.
pub const ACTOR_HEARTBEAT: Duration = Duration::from_secs(2);
/// The update loop clears readiness after this much heartbeat silence.
pub const ACTOR_STALL: Duration = Duration::from_secs(10);
/// Cadence of selection auto-scroll ticks.
pub const SELECTION_TICK: Duration = Duration::from_millis(100);

/// Spawn the actor task. Must be called on a tokio runtime.
pub fn spawn_actor(
    mut rx: mpsc::Receiver<TabEvent>,
    sink: MsgSink,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(event = "core.actor.started");
        sink.send(Message::TabActorReady);

        let mut heartbeat = tokio::time::interval(ACTOR_HEARTBEAT);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick of a tokio interval fires immediately; readiness
        // already covers it.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            let TabEvent { ws, id, tab, kind } = event;
                            let Some(shared) = tab.upgrade() else {
                                debug!(event = "core.actor.tab_gone", ws = %ws, tab = %id);
                                continue;
                            };
                            handle_event(&shared, &ws, id, kind, &sink);
                        }
                        None => {
                            info!(event = "core.actor.drained");
                            return;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    sink.send(Message::TabActorHeartbeat);
                }
            }
        }
    })
}

/// Apply one tab event under the tab mutex.
///
/// Also the direct-mutation fallback: the update loop calls this inline
/// while the actor is not ready.
pub fn handle_event(
    shared: &TabShared,
    ws: &WorkspaceId,
    id: TabId,
    kind: TabEventKind,
    sink: &MsgSink,
) {
    let mut guard = shared.lock();
    let inner = &mut *guard;

    match kind {
        TabEventKind::SelectionClear { notify_copy } => {
            if let Some(vt) = inner.vt.as_mut() {
                if notify_copy {
                    if let Some(text) = vt.selected_text().filter(|t| !t.is_empty()) {
                        sink.send(Message::TabSelectionResult {
                            ws: ws.clone(),
                            id,
                            clipboard: text,
                        });
                    }
                }
                vt.clear_selection();
            }
            inner.selection.reset();
            inner.scroll.dir = 0;
            inner.scroll.ticking = false;
        }

        TabEventKind::SelectionCopy => {
            if let Some(text) = inner
                .vt
                .as_ref()
                .and_then(|vt| vt.selected_text())
                .filter(|t| !t.is_empty())
            {
                sink.send(Message::TabSelectionResult {
                    ws: ws.clone(),
                    id,
                    clipboard: text,
                });
            }
        }

        TabEventKind::SelectionStart { x, y_screen, in_bounds } => {
            let Some(vt) = inner.vt.as_mut() else { return };
            if !in_bounds || y_screen < 0 || y_screen >= vt.rows() as isize {
                return;
            }
            let x = x.min(vt.cols() as usize - 1);
            let line_abs = vt.screen_y_to_absolute_line(y_screen as usize);
            inner.selection.begin(x, line_abs);
            inner.scroll.dir = 0;
            inner.scroll.ticking = false;
            vt.set_selection(x, line_abs, x, line_abs, true, false);
        }

        TabEventKind::SelectionUpdate { x, y_screen } => {
            if !inner.selection.active {
                return;
            }
            let Some(vt) = inner.vt.as_mut() else { return };
            let rows = vt.rows() as isize;
            let x = x.clamp(0, vt.cols() as isize - 1) as usize;

            // A drag escaping the viewport scrolls one line now and arms the
            // 100 ms tick loop for the rest.
            let (dir, y_eff): (i8, usize) = if y_screen < 0 {
                vt.scroll_view(1);
                (1, 0)
            } else if y_screen >= rows {
                vt.scroll_view(-1);
                (-1, (rows - 1) as usize)
            } else {
                (0, y_screen as usize)
            };

            let line_abs = vt.screen_y_to_absolute_line(y_eff);
            inner.selection.end_x = x;
            inner.selection.end_line_abs = line_abs;
            vt.set_selection(
                inner.selection.start_x,
                inner.selection.start_line_abs,
                x,
                line_abs,
                true,
                false,
            );

            inner.scroll.dir = dir;
            if dir != 0 && !inner.scroll.ticking {
                inner.scroll.ticking = true;
                sink.send(Message::SelectionTickRequest {
                    ws: ws.clone(),
                    id,
                    generation: inner.selection.generation,
                });
            }
        }

        TabEventKind::SelectionScrollTick { generation } => {
            if generation != inner.selection.generation {
                // A newer drag owns the tick loop now; this tick is stale
                // and must not disturb it.
                return;
            }
            if !inner.selection.active {
                inner.scroll.ticking = false;
                return;
            }
            if inner.scroll.dir == 0 {
                // Drag came back inside the viewport; let the chain die so
                // the next escape re-arms it.
                inner.scroll.ticking = false;
                return;
            }
            let Some(vt) = inner.vt.as_mut() else {
                inner.scroll.ticking = false;
                return;
            };

            let dir = inner.scroll.dir;
            vt.scroll_view(dir as i32);
            let edge = if dir > 0 { 0 } else { vt.rows() as usize - 1 };
            let line_abs = vt.screen_y_to_absolute_line(edge);
            inner.selection.end_line_abs = line_abs;
            vt.set_selection(
                inner.selection.start_x,
                inner.selection.start_line_abs,
                inner.selection.end_x,
                line_abs,
                true,
                false,
            );
            sink.send(Message::SelectionTickRequest {
                ws: ws.clone(),
                id,
                generation,
            });
        }

        TabEventKind::SelectionFinish => {
            inner.selection.active = false;
            inner.scroll.dir = 0;
            inner.scroll.ticking = false;
            if let Some(text) = inner
                .vt
                .as_ref()
                .and_then(|vt| vt.selected_text())
                .filter(|t| !t.is_empty())
            {
                sink.send(Message::TabSelectionResult {
                    ws: ws.clone(),
                    id,
                    clipboard: text,
                });
            }
        }

        TabEventKind::ScrollBy { delta } => {
            if let Some(vt) = inner.vt.as_mut() {
                vt.scroll_view(delta);
            }
        }
        TabEventKind::ScrollPage { sign } => {
            if let Some(vt) = inner.vt.as_mut() {
                vt.scroll_view_page(sign);
            }
        }
        TabEventKind::ScrollToTop => {
            if let Some(vt) = inner.vt.as_mut() {
                vt.scroll_view_to_top();
            }
        }
        TabEventKind::ScrollToBottom => {
            if let Some(vt) = inner.vt.as_mut() {
                vt.scroll_view_to_bottom();
            }
        }

        TabEventKind::WriteOutput { bytes } => {
            if let Some(vt) = inner.vt.as_mut() {
                vt.write(&bytes);
            }
        }

        TabEventKind::SendInput { bytes } => {
            send_to_pty(inner, ws, id, &bytes, sink);
        }
        TabEventKind::Paste { text } => {
            let bracketed = inner
                .vt
                .as_ref()
                .map(|vt| vt.bracketed_paste())
                .unwrap_or(false);
            let bytes = if bracketed {
                let mut framed = Vec::with_capacity(text.len() + 12);
                framed.extend_from_slice(b"\x1b[200~");
                framed.extend_from_slice(text.as_bytes());
                framed.extend_from_slice(b"\x1b[201~");
                framed
            } else {
                text.into_bytes()
            };
            send_to_pty(inner, ws, id, &bytes, sink);
        }
        TabEventKind::SendResponse { bytes } => {
            send_to_pty(inner, ws, id, &bytes, sink);
        }

        TabEventKind::DiffInput { input } => {
            if let Some(msg) = inner.viewer.as_mut().and_then(|v| v.update(input)) {
                sink.send(msg);
            }
        }
    }
}

fn send_to_pty(
    inner: &mut crate::tabs::TabInner,
    ws: &WorkspaceId,
    id: TabId,
    bytes: &[u8],
    sink: &MsgSink,
) {
    let Some(agent) = inner.agent.as_ref() else {
        debug!(event = "core.actor.input_no_agent", ws = %ws, tab = %id);
        return;
    };
    if let Err(e) = agent.send_bytes(bytes) {
        sink.send(Message::TabInputFailed {
            ws: ws.clone(),
            id,
            error: e.to_string(),
        });
    }
}
