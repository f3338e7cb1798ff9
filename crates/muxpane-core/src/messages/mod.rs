//! Message contracts between the pane runtime and the UI update loop, and
//! the event vocabulary of the tab actor.
//!
//! Reader tasks, the actor, and lifecycle commands never touch the model
//! directly: they address tabs by `(workspace_id, tab_id)` through
//! [`Message`]s delivered over the [`MsgSink`]. The update loop resolves the
//! current tab and drops messages for tabs that no longer exist.

use std::sync::Weak;

use tokio::sync::mpsc;
use tracing::debug;

use crate::lifecycle::errors::LifecycleError;
use crate::tabs::{TabId, TabShared, WorkspaceId};
use crate::term::pty::AgentPty;
use crate::viewer::ViewerInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Warn,
}

/// A freshly attached PTY client plus whatever the backend captured from the
/// session's pane before we attached.
pub struct AgentHandoff {
    pub agent: AgentPty,
    pub captured: Vec<u8>,
}

impl std::fmt::Debug for AgentHandoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandoff")
            .field("captured_bytes", &self.captured.len())
            .finish_non_exhaustive()
    }
}

/// Messages delivered to the UI update loop.
#[derive(Debug)]
pub enum Message {
    TabCreated {
        ws: WorkspaceId,
        id: TabId,
    },
    TabClosed {
        ws: WorkspaceId,
        id: TabId,
    },
    TabDetached {
        ws: WorkspaceId,
        id: TabId,
    },
    TabReattached {
        ws: WorkspaceId,
        id: TabId,
    },
    /// Lifecycle flags changed in a way the tab bar should reflect.
    TabStateChanged {
        ws: WorkspaceId,
        id: TabId,
    },
    /// Text extracted from a finished or copied selection.
    TabSelectionResult {
        ws: WorkspaceId,
        id: TabId,
        clipboard: String,
    },
    /// A PTY write failed; the tab is now disconnected.
    TabInputFailed {
        ws: WorkspaceId,
        id: TabId,
        error: String,
    },
    Toast {
        level: ToastLevel,
        text: String,
    },
    /// Coalesced PTY output for one tab.
    PtyOutput {
        ws: WorkspaceId,
        id: TabId,
        bytes: Vec<u8>,
    },
    /// A scheduled flush tick fired.
    PtyFlush {
        ws: WorkspaceId,
        id: TabId,
    },
    /// The reader pipeline for a tab exited.
    PtyStopped {
        ws: WorkspaceId,
        id: TabId,
        /// Sequence number of the reader that stopped; stale stops are ignored.
        seq: u64,
        /// Read error, if the pipeline died on one.
        reason: Option<String>,
    },
    /// Backoff elapsed; respawn the reader for this tab.
    PtyRestart {
        ws: WorkspaceId,
        id: TabId,
    },
    /// The actor asked for a selection auto-scroll tick in 100 ms.
    SelectionTickRequest {
        ws: WorkspaceId,
        id: TabId,
        generation: u64,
    },
    TabActorReady,
    TabActorHeartbeat,
    /// Result of an async tab creation command.
    PtyTabCreateResult {
        ws: WorkspaceId,
        id: TabId,
        outcome: Result<AgentHandoff, LifecycleError>,
    },
    /// Result of an async reattach (or restart, when `restarted`) command.
    PtyTabReattachResult {
        ws: WorkspaceId,
        id: TabId,
        outcome: Result<AgentHandoff, LifecycleError>,
        restarted: bool,
    },
    /// Best-effort backend check after a reader exit with a closed PTY.
    SessionSyncResult {
        ws: WorkspaceId,
        id: TabId,
        alive: bool,
    },
}

/// Clonable emitter of [`Message`]s back to the UI update loop.
///
/// Sends never block; a closed receiver (UI shutting down) downgrades sends
/// to debug logs.
#[derive(Clone)]
pub struct MsgSink {
    tx: mpsc::UnboundedSender<Message>,
}

impl MsgSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, msg: Message) {
        if self.tx.send(msg).is_err() {
            debug!(event = "core.messages.sink_closed");
        }
    }
}

/// An event addressed to the tab actor.
///
/// Carries a weak handle to the tab's shared state so the actor can resolve
/// it without keeping closed tabs alive; events for dropped tabs are
/// discarded silently.
pub struct TabEvent {
    pub ws: WorkspaceId,
    pub id: TabId,
    pub tab: Weak<TabShared>,
    pub kind: TabEventKind,
}

impl std::fmt::Debug for TabEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabEvent")
            .field("ws", &self.ws)
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

#[derive(Debug)]
pub enum TabEventKind {
    /// Clear the VT selection; optionally emit the selected text first.
    SelectionClear { notify_copy: bool },
    /// Emit the selected text without touching selection state.
    SelectionCopy,
    SelectionStart {
        x: usize,
        y_screen: isize,
        in_bounds: bool,
    },
    SelectionUpdate { x: isize, y_screen: isize },
    SelectionScrollTick { generation: u64 },
    SelectionFinish,
    ScrollBy { delta: i32 },
    ScrollPage { sign: i32 },
    ScrollToTop,
    ScrollToBottom,
    /// Flush-engine chunk bound for the VT. The authoritative VT write path.
    WriteOutput { bytes: Vec<u8> },
    SendInput { bytes: Vec<u8> },
    Paste { text: String },
    /// Bytes the VT emulator wants written back to the PTY (query replies).
    SendResponse { bytes: Vec<u8> },
    DiffInput { input: ViewerInput },
}

impl TabEventKind {
    /// Lossy events may be dropped when the actor channel is congested;
    /// a newer event of the same kind supersedes them.
    pub fn is_lossy(&self) -> bool {
        matches!(
            self,
            TabEventKind::SelectionUpdate { .. }
                | TabEventKind::SelectionScrollTick { .. }
                | TabEventKind::ScrollBy { .. }
                | TabEventKind::ScrollPage { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lossy_event_kinds() {
        assert!(TabEventKind::SelectionUpdate { x: 0, y_screen: 0 }.is_lossy());
        assert!(TabEventKind::SelectionScrollTick { generation: 1 }.is_lossy());
        assert!(TabEventKind::ScrollBy { delta: 3 }.is_lossy());
        assert!(TabEventKind::ScrollPage { sign: -1 }.is_lossy());

        assert!(!TabEventKind::SelectionFinish.is_lossy());
        assert!(!TabEventKind::WriteOutput { bytes: vec![] }.is_lossy());
        assert!(!TabEventKind::SendInput { bytes: vec![] }.is_lossy());
    }

    #[tokio::test]
    async fn test_msg_sink_send_and_receive() {
        let (sink, mut rx) = MsgSink::channel();
        sink.send(Message::TabActorReady);
        match rx.recv().await {
            Some(Message::TabActorReady) => {}
            other => panic!("expected TabActorReady, got: {:?}", other),
        }
    }

    #[test]
    fn test_msg_sink_closed_receiver_does_not_panic() {
        let (sink, rx) = MsgSink::channel();
        drop(rx);
        sink.send(Message::TabActorHeartbeat);
    }
}
