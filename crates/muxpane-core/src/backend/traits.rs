//! Session backend trait definition.

use portable_pty::CommandBuilder;

use crate::backend::errors::BackendError;

/// Liveness of a multiplexer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub exists: bool,
    pub has_live_pane: bool,
}

impl SessionState {
    /// A session we can reattach to without recreating it.
    pub fn is_alive(&self) -> bool {
        self.exists && self.has_live_pane
    }
}

/// Interface to the session multiplexer.
///
/// The pane core calls these RPCs from blocking lifecycle commands; every
/// implementation must be callable from any thread. Tags are opaque
/// key/value strings; the backend decides how they are stored.
pub trait SessionBackend: Send + Sync {
    /// The canonical name of this backend (e.g. "tmux").
    fn name(&self) -> &'static str;

    /// Derive a deterministic session name for a tab.
    fn session_name(&self, prefix: &str, workspace_id: &str, tab_id: &str) -> String;

    /// Check whether a session exists and has a live pane.
    fn session_state(&self, name: &str) -> Result<SessionState, BackendError>;

    /// Kill a session. Killing an absent session is not an error.
    fn kill(&self, name: &str) -> Result<(), BackendError>;

    /// Capture the session's pane contents (scrollback plus screen).
    fn capture_pane(&self, name: &str) -> Result<Vec<u8>, BackendError>;

    /// Attach an opaque tag to a session.
    fn set_session_tag(&self, name: &str, key: &str, value: &str) -> Result<(), BackendError>;

    /// Command that creates the session (or attaches if it already exists)
    /// and runs the given agent command inside it. Spawned under a PTY.
    fn spawn_command(&self, name: &str, agent_command: &str) -> CommandBuilder;

    /// Command that attaches a client to an existing session. Spawned under
    /// a PTY.
    fn attach_command(&self, name: &str) -> CommandBuilder;
}
