//! The center pane model.
//!
//! `CenterPane` owns the tab registry and is driven by the host's update
//! loop: the host drains the message receiver and feeds every message to
//! [`CenterPane::update`], which consumes runtime messages (output, flush
//! ticks, lifecycle results) and hands host-facing ones (toasts, clipboard
//! results, tab notifications) back.
//!
//! Concurrency: the update loop is the only code that touches registry
//! metadata. VT and selection state is mutated through the tab actor while
//! it is ready, and directly under the tab mutex otherwise; both paths run
//! the same handler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::actor::{self, ACTOR_CHANNEL_CAP, ACTOR_STALL, SELECTION_TICK};
use crate::backend::SessionBackend;
use crate::config::PaneConfig;
use crate::flush::{FLUSH_CHUNK, FLUSH_CHUNK_ACTIVE, FLUSH_REARM, flush_timings};
use crate::lifecycle::{self, LifecycleError, tag_session_async, toast_error};
use crate::messages::{Message, MsgSink, TabEvent, TabEventKind};
use crate::reader::{HEARTBEAT_STALL, now_ns};
use crate::render::SnapshotCache;
use crate::tabs::{RestartDecision, TabId, TabRegistry, WorkspaceId};

/// Throttle for `last_input_at` / `last_output_at` session tags.
const ACTIVITY_TAG_THROTTLE: Duration = Duration::from_secs(1);

pub struct CenterPane {
    pub(crate) config: PaneConfig,
    pub(crate) backend: Arc<dyn SessionBackend>,
    pub(crate) sink: MsgSink,
    pub(crate) registry: TabRegistry,
    /// The workspace currently shown in the pane.
    pub(crate) workspace: WorkspaceId,
    pub(crate) tab_events: mpsc::Sender<TabEvent>,
    pub(crate) actor_ready: bool,
    pub(crate) last_actor_heartbeat: Option<Instant>,
    pub(crate) width: u16,
    pub(crate) height: u16,
    pub(crate) offset_x: u16,
    pub(crate) focused: bool,
    pub(crate) snapshot_cache: Option<SnapshotCache>,
}

impl CenterPane {
    /// Build the pane and spawn its tab actor. Must be called on a tokio
    /// runtime.
    pub fn new(
        config: PaneConfig,
        backend: Arc<dyn SessionBackend>,
        sink: MsgSink,
        workspace: WorkspaceId,
    ) -> Self {
        let (tab_events, actor_rx) = mpsc::channel(ACTOR_CHANNEL_CAP);
        actor::spawn_actor(actor_rx, sink.clone());

        Self {
            config,
            backend,
            sink,
            registry: TabRegistry::new(),
            workspace,
            tab_events,
            actor_ready: false,
            last_actor_heartbeat: None,
            width: 80,
            height: 24,
            offset_x: 0,
            focused: true,
            snapshot_cache: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(
        config: PaneConfig,
        backend: Arc<dyn SessionBackend>,
        workspace: WorkspaceId,
    ) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (sink, rx) = MsgSink::channel();
        (Self::new(config, backend, sink, workspace), rx)
    }

    // ---- host surface ----

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn set_workspace(&mut self, ws: WorkspaceId) {
        if self.workspace != ws {
            self.workspace = ws;
            self.invalidate_snapshot_cache();
        }
    }

    pub fn set_focused(&mut self, focused: bool) {
        self.focused = focused;
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    /// Resize the pane chrome; propagates to the active tab's PTY and VT.
    pub fn resize(&mut self, width: u16, height: u16, offset_x: u16) {
        if (self.width, self.height, self.offset_x) == (width, height, offset_x) {
            return;
        }
        self.width = width;
        self.height = height;
        self.offset_x = offset_x;
        self.invalidate_snapshot_cache();

        let (rows, cols) = self.pty_size();
        for (_, tab) in self.registry.iter_all_mut() {
            let mut inner = tab.shared.lock();
            if inner.pty_rows == rows && inner.pty_cols == cols {
                continue;
            }
            inner.pty_rows = rows;
            inner.pty_cols = cols;
            if let Some(vt) = inner.vt.as_mut() {
                vt.resize(cols, rows);
            }
            if let Some(agent) = inner.agent.as_ref() {
                if let Err(e) = agent.set_size(rows, cols) {
                    warn!(event = "core.model.resize_pty_failed", tab = %tab.id, error = %e);
                }
            }
        }
    }

    /// PTY rows/cols implied by the current chrome metrics.
    pub(crate) fn pty_size(&self) -> (u16, u16) {
        let viewport = crate::render::terminal_viewport(self.width, self.height, self.offset_x);
        (viewport.height, viewport.width)
    }

    pub fn registry(&self) -> &TabRegistry {
        &self.registry
    }

    pub fn config(&self) -> &PaneConfig {
        &self.config
    }

    pub fn focus_tab(&mut self, index: usize) {
        let ws = self.workspace.clone();
        self.registry
            .set_active_index(&ws, index, lifecycle::epoch_secs());
        self.invalidate_snapshot_cache();
    }

    pub fn next_tab(&mut self) {
        let ws = self.workspace.clone();
        let count = self.registry.tabs(&ws).len();
        if count > 1 {
            let next = (self.registry.active_index(&ws) + 1) % count;
            self.focus_tab(next);
        }
    }

    pub fn prev_tab(&mut self) {
        let ws = self.workspace.clone();
        let count = self.registry.tabs(&ws).len();
        if count > 1 {
            let current = self.registry.active_index(&ws);
            let prev = if current == 0 { count - 1 } else { current - 1 };
            self.focus_tab(prev);
        }
    }

    pub fn create_tab(&mut self, assistant: &str) {
        if let Err(e) = lifecycle::create::create_agent_tab(self, assistant) {
            toast_error(&self.sink, &e);
        }
    }

    pub fn create_viewer_tab(
        &mut self,
        kind: &str,
        title: &str,
        viewer: Box<dyn crate::viewer::Viewer>,
    ) -> TabId {
        lifecycle::create::create_viewer_tab(self, kind, title, viewer)
    }

    pub fn detach_active(&mut self) {
        self.with_active(|pane, ws, id| lifecycle::detach::detach_tab(pane, &ws, id));
    }

    pub fn reattach_active(&mut self) {
        self.with_active(|pane, ws, id| lifecycle::reattach::reattach_tab(pane, &ws, id));
    }

    pub fn restart_active(&mut self) {
        self.with_active(|pane, ws, id| lifecycle::restart::restart_tab(pane, &ws, id));
    }

    pub fn close_active(&mut self) {
        self.with_active(|pane, ws, id| lifecycle::close::close_tab(pane, &ws, id));
    }

    fn with_active(
        &mut self,
        op: impl FnOnce(&mut Self, WorkspaceId, TabId) -> Result<(), LifecycleError>,
    ) {
        let ws = self.workspace.clone();
        let Some(id) = self.registry.active_tab(&ws).map(|t| t.id) else {
            return;
        };
        if let Err(e) = op(self, ws, id) {
            toast_error(&self.sink, &e);
        }
    }

    /// Tear down every tab of a workspace that was deleted in the host.
    /// Sessions are left alive; their tabs are simply forgotten.
    pub fn cleanup_workspace(&mut self, ws: &str) {
        for mut tab in self.registry.cleanup_workspace(ws) {
            lifecycle::stop_reader(&mut tab);
            let mut inner = tab.shared.lock();
            if let Some(agent) = inner.agent.take() {
                agent.close();
            }
        }
        self.invalidate_snapshot_cache();
    }

    /// Cancel readers and close PTY clients; multiplexer sessions stay
    /// alive for later reattach. Dropping the pane afterwards closes the
    /// actor channel, which drains and exits the actor.
    pub fn shutdown(&mut self) {
        info!(event = "core.model.shutdown_started");
        for (_, tab) in self.registry.iter_all_mut() {
            lifecycle::stop_reader(tab);
            let mut inner = tab.shared.lock();
            if let Some(agent) = inner.agent.take() {
                agent.close();
            }
        }
    }

    pub(crate) fn invalidate_snapshot_cache(&mut self) {
        self.snapshot_cache = None;
    }

    // ---- message processing ----

    /// Process one message. Runtime messages are consumed; host-facing
    /// messages are handed back for presentation.
    pub fn update(&mut self, msg: Message) -> Option<Message> {
        match msg {
            Message::PtyOutput { ws, id, bytes } => {
                self.on_pty_output(ws, id, bytes);
                None
            }
            Message::PtyFlush { ws, id } => {
                self.on_pty_flush(ws, id);
                None
            }
            Message::PtyStopped {
                ws,
                id,
                seq,
                reason,
            } => {
                self.on_pty_stopped(ws, id, seq, reason);
                None
            }
            Message::PtyRestart { ws, id } => {
                self.on_pty_restart(ws, id);
                None
            }
            Message::SelectionTickRequest { ws, id, generation } => {
                self.on_selection_tick_request(ws, id, generation);
                None
            }
            Message::TabActorReady => {
                info!(event = "core.model.actor_ready");
                self.actor_ready = true;
                self.last_actor_heartbeat = Some(Instant::now());
                None
            }
            Message::TabActorHeartbeat => {
                self.actor_ready = true;
                self.last_actor_heartbeat = Some(Instant::now());
                None
            }
            Message::PtyTabCreateResult { ws, id, outcome } => {
                lifecycle::create::handle_create_result(self, &ws, id, outcome);
                None
            }
            Message::PtyTabReattachResult {
                ws,
                id,
                outcome,
                restarted,
            } => {
                lifecycle::reattach::handle_reattach_result(self, &ws, id, outcome, restarted);
                None
            }
            Message::SessionSyncResult { ws, id, alive } => {
                self.on_session_sync(ws, id, alive);
                None
            }
            Message::TabInputFailed { ws, id, error } => {
                self.on_input_failed(&ws, id, &error);
                Some(Message::TabInputFailed { ws, id, error })
            }
            other => Some(other),
        }
    }

    /// Per-frame supervisor: stalled readers are cancelled into the restart
    /// cycle, and a silent actor loses its readiness so mutations fall back
    /// to the direct path.
    pub fn on_frame(&mut self) {
        let stall_ns = HEARTBEAT_STALL.as_nanos() as u64;
        let now = now_ns();

        let mut stalled: Vec<(WorkspaceId, TabId)> = Vec::new();
        for (ws, _, tab) in self.registry.iter_all() {
            if let Some(reader) = &tab.reader {
                let beat = tab.shared.heartbeat_ns();
                if now.saturating_sub(beat) > stall_ns {
                    warn!(
                        event = "core.model.reader_stalled",
                        ws = %ws,
                        tab = %tab.id,
                        seq = reader.seq,
                    );
                    stalled.push((ws.clone(), tab.id));
                }
            }
        }
        for (ws, id) in stalled {
            if let Some(tab) = self.registry.tab_by_id_mut(&ws, id) {
                lifecycle::stop_reader(tab);
            }
            self.reader_exited(&ws, id, Some("reader heartbeat stall".to_string()));
        }

        if self.actor_ready {
            let silent = self
                .last_actor_heartbeat
                .map(|at| at.elapsed() > ACTOR_STALL)
                .unwrap_or(true);
            if silent {
                warn!(event = "core.model.actor_stalled");
                self.actor_ready = false;
            }
        }
    }

    // ---- output flush engine ----

    fn is_active_tab(&self, ws: &str, id: TabId) -> bool {
        ws == self.workspace
            && self
                .registry
                .active_tab(ws)
                .map(|t| t.id == id)
                .unwrap_or(false)
    }

    fn on_pty_output(&mut self, ws: WorkspaceId, id: TabId, bytes: Vec<u8>) {
        let now = Instant::now();
        let is_active = self.is_active_tab(&ws, id);
        let backend = self.backend.clone();

        let Some(tab) = self.registry.tab_by_id_mut(&ws, id) else {
            // Closed while output was in flight; dropped silently.
            debug!(event = "core.model.output_dropped", ws = %ws, tab = %id);
            return;
        };

        if tab.pending.is_empty() {
            tab.flush_pending_since = Some(now);
        }
        tab.pending.append(&bytes);
        tab.last_output_at = Some(now);

        let stamp_tag = tab
            .last_output_tag_at
            .map(|at| now.duration_since(at) >= ACTIVITY_TAG_THROTTLE)
            .unwrap_or(true);
        if stamp_tag {
            tab.last_output_tag_at = Some(now);
            tag_session_async(
                backend,
                tab.session_name.clone(),
                "last_output_at",
                lifecycle::epoch_ms_string(),
            );
        }

        if !tab.flush_scheduled {
            tab.flush_scheduled = true;
            let (alt, cols, rows) = {
                let inner = tab.shared.lock();
                (
                    inner.vt.as_ref().map(|vt| vt.alt_screen()).unwrap_or(false),
                    inner.pty_cols,
                    inner.pty_rows,
                )
            };
            let timings = flush_timings(alt, is_active, tab.pending.len(), cols, rows);
            self.schedule_flush(ws, id, timings.quiet);
        }
    }

    fn on_pty_flush(&mut self, ws: WorkspaceId, id: TabId) {
        let now = Instant::now();
        let is_active = self.is_active_tab(&ws, id);

        let dispatch = {
            let Some(tab) = self.registry.tab_by_id_mut(&ws, id) else {
                // Tab closed while the tick was pending; the tick is a no-op.
                return;
            };
            tab.flush_scheduled = false;

            if tab.pending.is_empty() {
                tab.flush_pending_since = None;
                None
            } else {
                let (alt, cols, rows) = {
                    let inner = tab.shared.lock();
                    (
                        inner.vt.as_ref().map(|vt| vt.alt_screen()).unwrap_or(false),
                        inner.pty_cols,
                        inner.pty_rows,
                    )
                };
                let timings = flush_timings(alt, is_active, tab.pending.len(), cols, rows);
                let since_output = tab
                    .last_output_at
                    .map(|at| now.duration_since(at))
                    .unwrap_or_default();
                let since_first = tab
                    .flush_pending_since
                    .map(|at| now.duration_since(at))
                    .unwrap_or_default();

                if since_output < timings.quiet && since_first < timings.max {
                    // Output is still streaming; wait out the quiet gap.
                    tab.flush_scheduled = true;
                    let remaining = timings.quiet - since_output;
                    Some((None, remaining))
                } else {
                    let cap = if is_active {
                        FLUSH_CHUNK_ACTIVE
                    } else {
                        FLUSH_CHUNK
                    };
                    let bytes = tab.pending.take(cap);
                    if tab.pending.is_empty() {
                        tab.flush_pending_since = None;
                        Some((Some(bytes), Duration::ZERO))
                    } else {
                        tab.flush_scheduled = true;
                        Some((Some(bytes), FLUSH_REARM))
                    }
                }
            }
        };

        match dispatch {
            None => {}
            Some((maybe_bytes, rearm)) => {
                if let Some(bytes) = maybe_bytes {
                    self.dispatch_tab_event(&ws, id, TabEventKind::WriteOutput { bytes });
                    self.invalidate_snapshot_cache();
                }
                if rearm > Duration::ZERO {
                    self.schedule_flush(ws, id, rearm);
                }
            }
        }
    }

    fn schedule_flush(&self, ws: WorkspaceId, id: TabId, delay: Duration) {
        let sink = self.sink.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            sink.send(Message::PtyFlush { ws, id });
        });
    }

    // ---- reader lifecycle ----

    fn on_pty_stopped(&mut self, ws: WorkspaceId, id: TabId, seq: u64, reason: Option<String>) {
        {
            let Some(tab) = self.registry.tab_by_id_mut(&ws, id) else {
                return;
            };
            match &tab.reader {
                Some(handle) if handle.seq == seq => {}
                _ => {
                    // A stop from a reader we already replaced or cancelled.
                    debug!(event = "core.model.stale_reader_stop", ws = %ws, tab = %id, seq = seq);
                    return;
                }
            }
            tab.reader = None;
            tab.running = false;
        }
        self.reader_exited(&ws, id, reason);
    }

    /// Common exit handling once a reader is known to be gone: restart with
    /// backoff while the PTY is open, detach (and schedule a best-effort
    /// state sync) when it is not.
    fn reader_exited(&mut self, ws: &WorkspaceId, id: TabId, reason: Option<String>) {
        let sink = self.sink.clone();
        let backend = self.backend.clone();

        let Some(tab) = self.registry.tab_by_id_mut(ws, id) else {
            return;
        };

        let agent_open = {
            let inner = tab.shared.lock();
            inner
                .agent
                .as_ref()
                .map(|a| !a.is_closed())
                .unwrap_or(false)
        };

        if agent_open && reason.is_some() {
            match tab.restart.register_failure(Instant::now()) {
                RestartDecision::Backoff(delay) => {
                    info!(
                        event = "core.model.reader_restart_scheduled",
                        ws = %ws,
                        tab = %id,
                        attempt = tab.restart.count(),
                        delay_ms = delay.as_millis() as u64,
                        reason = ?reason,
                    );
                    let restart_ws = ws.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        sink.send(Message::PtyRestart { ws: restart_ws, id });
                    });
                }
                RestartDecision::GiveUp => {
                    warn!(
                        event = "core.model.reader_restart_budget_exhausted",
                        ws = %ws,
                        tab = %id,
                    );
                    {
                        let mut inner = tab.shared.lock();
                        if let Some(agent) = inner.agent.take() {
                            agent.close();
                        }
                    }
                    tab.detached = true;
                    sink.send(Message::TabStateChanged { ws: ws.clone(), id });
                }
            }
            return;
        }

        // PTY closed (or reader ended cleanly): the client is gone. The tab
        // is detached until a backend check tells us the session died too.
        {
            let mut inner = tab.shared.lock();
            if let Some(agent) = inner.agent.take() {
                agent.close();
            }
        }
        tab.detached = true;
        let session = tab.session_name.clone();
        sink.send(Message::TabStateChanged { ws: ws.clone(), id });

        if !session.is_empty() {
            let sync_ws = ws.clone();
            tokio::task::spawn_blocking(move || {
                let alive = backend
                    .session_state(&session)
                    .map(|s| s.is_alive())
                    .unwrap_or(true);
                sink.send(Message::SessionSyncResult {
                    ws: sync_ws,
                    id,
                    alive,
                });
            });
        }
    }

    fn on_pty_restart(&mut self, ws: WorkspaceId, id: TabId) {
        let sink = self.sink.clone();
        let state_dir = self.config.state_dir.clone();

        let Some(tab) = self.registry.tab_by_id_mut(&ws, id) else {
            return;
        };
        if tab.reader.is_some() || tab.detached {
            return;
        }

        match lifecycle::start_reader(tab, &sink, &state_dir) {
            Ok(()) => {
                debug!(event = "core.model.reader_restarted", ws = %ws, tab = %id);
            }
            Err(e) => {
                warn!(event = "core.model.reader_restart_failed", ws = %ws, tab = %id, error = %e);
                self.reader_exited(&ws, id, None);
            }
        }
    }

    fn on_input_failed(&mut self, ws: &WorkspaceId, id: TabId, error: &str) {
        let sink = self.sink.clone();
        let Some(tab) = self.registry.tab_by_id_mut(ws, id) else {
            return;
        };
        warn!(event = "core.model.input_failed", ws = %ws, tab = %id, error = error);
        lifecycle::stop_reader(tab);
        {
            let mut inner = tab.shared.lock();
            if let Some(agent) = inner.agent.take() {
                agent.close();
            }
        }
        tab.detached = true;
        sink.send(Message::TabStateChanged { ws: ws.clone(), id });
    }

    fn on_session_sync(&mut self, ws: WorkspaceId, id: TabId, alive: bool) {
        if alive {
            return;
        }
        let sink = self.sink.clone();
        let Some(tab) = self.registry.tab_by_id_mut(&ws, id) else {
            return;
        };
        if tab.detached && !tab.running {
            tab.detached = false;
            sink.send(Message::TabStateChanged { ws, id });
        }
    }

    // ---- actor dispatch ----

    fn on_selection_tick_request(&mut self, ws: WorkspaceId, id: TabId, generation: u64) {
        let Some(tab) = self.registry.tab_by_id(&ws, id) else {
            return;
        };
        let weak = Arc::downgrade(&tab.shared);
        let tx = self.tab_events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SELECTION_TICK).await;
            // Ticks are lossy: congestion or a closed channel just ends the
            // auto-scroll chain.
            if tx.capacity() <= tx.max_capacity() / 4 {
                return;
            }
            let _ = tx.try_send(TabEvent {
                ws,
                id,
                tab: weak,
                kind: TabEventKind::SelectionScrollTick { generation },
            });
        });
    }

    /// Route an event to the tab actor, or run it inline under the tab
    /// mutex while the actor is not ready.
    pub(crate) fn dispatch_tab_event(&mut self, ws: &str, id: TabId, kind: TabEventKind) {
        let Some(tab) = self.registry.tab_by_id(ws, id) else {
            return;
        };
        let shared = tab.shared.clone();

        if kind.is_lossy() && self.tab_events.capacity() <= self.tab_events.max_capacity() / 4 {
            debug!(event = "core.model.lossy_event_dropped", ws = %ws, tab = %id);
            return;
        }

        if self.actor_ready {
            let event = TabEvent {
                ws: ws.to_string(),
                id,
                tab: Arc::downgrade(&shared),
                kind,
            };
            match self.tab_events.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    if event.kind.is_lossy() {
                        debug!(event = "core.model.lossy_event_dropped", ws = %ws, tab = %id);
                    } else {
                        actor::handle_event(&shared, &event.ws, id, event.kind, &self.sink);
                    }
                }
                Err(TrySendError::Closed(event)) => {
                    self.actor_ready = false;
                    actor::handle_event(&shared, &event.ws, id, event.kind, &self.sink);
                }
            }
        } else {
            actor::handle_event(&shared, &ws.to_string(), id, kind, &self.sink);
        }
    }

    /// Dispatch to the active tab of the visible workspace.
    pub(crate) fn dispatch_to_active(&mut self, kind: TabEventKind) {
        let ws = self.workspace.clone();
        let Some(id) = self.registry.active_tab(&ws).map(|t| t.id) else {
            return;
        };
        self.dispatch_tab_event(&ws, id, kind);
    }

    /// Throttled `last_input_at` stamp, called by input dispatch.
    pub(crate) fn note_input_activity(&mut self, ws: &str, id: TabId) {
        let now = Instant::now();
        let backend = self.backend.clone();
        let Some(tab) = self.registry.tab_by_id_mut(ws, id) else {
            return;
        };
        let stamp = tab
            .last_input_tag_at
            .map(|at| now.duration_since(at) >= ACTIVITY_TAG_THROTTLE)
            .unwrap_or(true);
        if stamp {
            tab.last_input_tag_at = Some(now);
            tag_session_async(
                backend,
                tab.session_name.clone(),
                "last_input_at",
                lifecycle::epoch_ms_string(),
            );
        }
    }
}
