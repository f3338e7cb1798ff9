//! Tab state: identity, lifecycle flags, and the mutex-guarded hot state
//! shared with the tab actor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::flush::PendingOutput;
use crate::selection::{SelectionScroll, SelectionState};
use crate::term::pty::AgentPty;
use crate::term::vt::VtScreen;
use crate::viewer::Viewer;

/// Logical group key for tabs. Workspaces themselves live in the host app.
pub type WorkspaceId = String;

/// Process-wide unique tab identifier. Monotonic, never reused; survives
/// slice reordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(u64);

static NEXT_TAB_ID: AtomicU64 = AtomicU64::new(1);

impl TabId {
    pub fn next() -> Self {
        TabId(NEXT_TAB_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub fn for_test(raw: u64) -> Self {
        TabId(raw)
    }
}

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse lifecycle state as shown in the tab bar and persisted snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
    /// PTY client attached and presumed live.
    Running,
    /// No PTY client; the multiplexer session may still be alive.
    Detached,
    /// Neither client nor session; the tab remains for history.
    Stopped,
}

impl TabStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TabStatus::Running => "running",
            TabStatus::Detached => "detached",
            TabStatus::Stopped => "stopped",
        }
    }
}

/// Cancellation handle for a tab's reader pipeline.
///
/// Present exactly while a reader is active. `seq` distinguishes this
/// reader's exit notification from those of earlier, already-stopped
/// readers.
#[derive(Debug, Clone)]
pub struct ReaderHandle {
    pub cancel: CancellationToken,
    pub seq: u64,
}

impl ReaderHandle {
    /// Idempotent, panic-safe cancel.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

pub const RESTART_WINDOW: Duration = Duration::from_secs(60);
pub const RESTART_BUDGET: u32 = 5;
pub const RESTART_BACKOFF_INITIAL: Duration = Duration::from_millis(200);
pub const RESTART_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// What to do after a reader died with the PTY still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Schedule a restart after this delay.
    Backoff(Duration),
    /// Budget exhausted within the window; give up and detach.
    GiveUp,
}

/// Reader restart bookkeeping: up to [`RESTART_BUDGET`] restarts within
/// [`RESTART_WINDOW`], with exponential backoff between attempts.
#[derive(Debug, Clone)]
pub struct RestartState {
    count: u32,
    since: Option<Instant>,
    backoff: Duration,
}

impl Default for RestartState {
    fn default() -> Self {
        Self {
            count: 0,
            since: None,
            backoff: RESTART_BACKOFF_INITIAL,
        }
    }
}

impl RestartState {
    /// Record a reader failure and decide whether to retry.
    pub fn register_failure(&mut self, now: Instant) -> RestartDecision {
        match self.since {
            Some(since) if now.duration_since(since) <= RESTART_WINDOW => {}
            _ => {
                // New window: start counting afresh.
                self.since = Some(now);
                self.count = 0;
                self.backoff = RESTART_BACKOFF_INITIAL;
            }
        }

        self.count += 1;
        if self.count > RESTART_BUDGET {
            return RestartDecision::GiveUp;
        }

        let delay = self.backoff;
        self.backoff = (self.backoff * 2).min(RESTART_BACKOFF_MAX);
        RestartDecision::Backoff(delay)
    }

    /// Reset after a reader has run healthily again.
    pub fn reset(&mut self) {
        *self = RestartState::default();
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Hot tab state mutated only by the tab actor or by the update loop under
/// the mutex.
pub struct TabInner {
    pub vt: Option<VtScreen>,
    pub agent: Option<AgentPty>,
    pub viewer: Option<Box<dyn Viewer>>,
    pub selection: SelectionState,
    pub scroll: SelectionScroll,
    /// Last PTY size sent, compared before resizing.
    pub pty_rows: u16,
    pub pty_cols: u16,
}

impl TabInner {
    fn new() -> Self {
        Self {
            vt: None,
            agent: None,
            viewer: None,
            selection: SelectionState::default(),
            scroll: SelectionScroll::default(),
            pty_rows: 0,
            pty_cols: 0,
        }
    }
}

/// The part of a tab shared with the actor and (for the heartbeat) the
/// reader pipeline. Reader tasks never touch anything here but the atomic.
pub struct TabShared {
    pub id: TabId,
    pub ws: WorkspaceId,
    /// Reader liveness, as nanoseconds since an arbitrary process epoch.
    heartbeat_ns: AtomicU64,
    inner: Mutex<TabInner>,
}

impl TabShared {
    pub fn new(id: TabId, ws: WorkspaceId) -> Arc<Self> {
        Arc::new(Self {
            id,
            ws,
            heartbeat_ns: AtomicU64::new(0),
            inner: Mutex::new(TabInner::new()),
        })
    }

    /// Lock the hot state. A poisoned mutex is recovered rather than
    /// propagated: the state itself stays structurally valid and losing the
    /// pane beats losing the process.
    pub fn lock(&self) -> MutexGuard<'_, TabInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn beat(&self, now_ns: u64) {
        self.heartbeat_ns.store(now_ns, Ordering::Release);
    }

    pub fn heartbeat_ns(&self) -> u64 {
        self.heartbeat_ns.load(Ordering::Acquire)
    }
}

/// One UI tab. Owned by its workspace slice in the registry; mutated by the
/// update loop, with the `shared` portion also reachable from the actor.
pub struct Tab {
    pub id: TabId,
    pub workspace_id: WorkspaceId,
    /// Assistant kind tag (`claude`, `viewer`, `diff`, ...), set at creation.
    pub assistant: String,
    /// Display title for the tab bar.
    pub title: String,
    /// Multiplexer session id; non-empty when the session is owned.
    pub session_name: String,
    pub running: bool,
    pub detached: bool,
    pub reattach_in_flight: bool,
    /// Output awaiting flush into the VT.
    pub pending: PendingOutput,
    pub flush_scheduled: bool,
    pub last_output_at: Option<Instant>,
    pub flush_pending_since: Option<Instant>,
    pub reader: Option<ReaderHandle>,
    /// Sequence source for reader handles.
    pub reader_seq: u64,
    pub restart: RestartState,
    /// Two-phase close latch: `closing` stops event delivery, `closed` is
    /// set after teardown. Once set, never cleared.
    pub closing: bool,
    pub closed: bool,
    /// Seconds since epoch.
    pub created_at: i64,
    pub last_focused_at: Option<i64>,
    /// Throttle markers for backend activity tags.
    pub last_input_tag_at: Option<Instant>,
    pub last_output_tag_at: Option<Instant>,
    pub shared: Arc<TabShared>,
}

impl Tab {
    pub fn new(
        id: TabId,
        workspace_id: WorkspaceId,
        assistant: &str,
        session_name: String,
        created_at: i64,
    ) -> Self {
        Self {
            id,
            workspace_id: workspace_id.clone(),
            assistant: assistant.to_string(),
            title: format!("{} {}", assistant, id),
            session_name,
            running: false,
            detached: false,
            reattach_in_flight: false,
            pending: PendingOutput::new(),
            flush_scheduled: false,
            last_output_at: None,
            flush_pending_since: None,
            reader: None,
            reader_seq: 0,
            restart: RestartState::default(),
            closing: false,
            closed: false,
            created_at,
            last_focused_at: None,
            last_input_tag_at: None,
            last_output_tag_at: None,
            shared: TabShared::new(id, workspace_id),
        }
    }

    pub fn status(&self) -> TabStatus {
        if self.running {
            TabStatus::Running
        } else if self.detached {
            TabStatus::Detached
        } else {
            TabStatus::Stopped
        }
    }

    /// Agent-class tabs host an external PTY session; viewer-class tabs
    /// host a [`Viewer`] and cannot be detached or reattached.
    pub fn is_agent(&self) -> bool {
        self.assistant != "viewer" && self.assistant != "diff"
    }

    pub fn attached(&self) -> bool {
        self.running && !self.detached
    }

    /// Ordering key for the attached-tab limit: least-recently-focused
    /// first, falling back to creation time when focus is unknown.
    pub fn focus_age_key(&self) -> i64 {
        self.last_focused_at.unwrap_or(self.created_at)
    }

    pub fn next_reader_seq(&mut self) -> u64 {
        self.reader_seq += 1;
        self.reader_seq
    }
}

impl std::fmt::Debug for Tab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tab")
            .field("id", &self.id)
            .field("ws", &self.workspace_id)
            .field("assistant", &self.assistant)
            .field("session", &self.session_name)
            .field("status", &self.status())
            .field("closing", &self.closing)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tab_ids_are_unique_and_monotonic() {
        let a = TabId::next();
        let b = TabId::next();
        assert!(b > a);
    }

    #[test]
    fn test_status_derivation() {
        let mut tab = Tab::new(TabId::next(), "ws".to_string(), "claude", "s".into(), 0);
        assert_eq!(tab.status(), TabStatus::Stopped);

        tab.running = true;
        assert_eq!(tab.status(), TabStatus::Running);

        tab.running = false;
        tab.detached = true;
        assert_eq!(tab.status(), TabStatus::Detached);
    }

    #[test]
    fn test_agent_classification() {
        let agent = Tab::new(TabId::next(), "ws".into(), "claude", "s".into(), 0);
        let diff = Tab::new(TabId::next(), "ws".into(), "diff", "".into(), 0);
        assert!(agent.is_agent());
        assert!(!diff.is_agent());
    }

    #[test]
    fn test_restart_backoff_doubles_to_cap() {
        let mut state = RestartState::default();
        let t0 = Instant::now();

        let mut delays = Vec::new();
        for _ in 0..RESTART_BUDGET {
            match state.register_failure(t0) {
                RestartDecision::Backoff(d) => delays.push(d),
                RestartDecision::GiveUp => panic!("gave up within budget"),
            }
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_millis(1600),
                Duration::from_millis(3200),
            ]
        );

        // Sixth failure inside the window exhausts the budget.
        assert_eq!(state.register_failure(t0), RestartDecision::GiveUp);
    }

    #[test]
    fn test_restart_window_expiry_resets_budget() {
        let mut state = RestartState::default();
        let t0 = Instant::now();
        for _ in 0..RESTART_BUDGET {
            let _ = state.register_failure(t0);
        }

        // Past the window the budget starts fresh at the initial backoff.
        let later = t0 + RESTART_WINDOW + Duration::from_secs(1);
        assert_eq!(
            state.register_failure(later),
            RestartDecision::Backoff(RESTART_BACKOFF_INITIAL)
        );
        assert_eq!(state.count(), 1);
    }

    #[test]
    fn test_focus_age_key_falls_back_to_created_at() {
        let mut tab = Tab::new(TabId::next(), "ws".into(), "claude", "s".into(), 100);
        assert_eq!(tab.focus_age_key(), 100);
        tab.last_focused_at = Some(500);
        assert_eq!(tab.focus_age_key(), 500);
    }

    #[test]
    fn test_shared_heartbeat() {
        let shared = TabShared::new(TabId::next(), "ws".to_string());
        assert_eq!(shared.heartbeat_ns(), 0);
        shared.beat(42);
        assert_eq!(shared.heartbeat_ns(), 42);
    }
}
