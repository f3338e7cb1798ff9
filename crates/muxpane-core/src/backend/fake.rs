//! In-memory session backend for unit tests.
//!
//! Records every RPC and spawns `cat` for PTY clients so lifecycle paths can
//! run end-to-end without a tmux server.

use std::sync::Mutex;

use portable_pty::CommandBuilder;

use crate::backend::errors::BackendError;
use crate::backend::traits::{SessionBackend, SessionState};

pub struct FakeBackend {
    calls: Mutex<Vec<String>>,
    state: Mutex<SessionState>,
    captured: Vec<u8>,
    fail_rpcs: Mutex<bool>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            state: Mutex::new(SessionState {
                exists: true,
                has_live_pane: true,
            }),
            captured: b"captured pane\r\n".to_vec(),
            fail_rpcs: Mutex::new(false),
        }
    }

    pub fn with_state(exists: bool, has_live_pane: bool) -> Self {
        let backend = Self::new();
        backend.set_state(exists, has_live_pane);
        backend
    }

    pub fn set_state(&self, exists: bool, has_live_pane: bool) {
        *self.state.lock().unwrap() = SessionState {
            exists,
            has_live_pane,
        };
    }

    pub fn set_fail_rpcs(&self, fail: bool) {
        *self.fail_rpcs.lock().unwrap() = fail;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), BackendError> {
        self.calls.lock().unwrap().push(call.clone());
        if *self.fail_rpcs.lock().unwrap() {
            return Err(BackendError::Rpc {
                command: call,
                message: "fake rpc failure".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn session_name(&self, prefix: &str, workspace_id: &str, tab_id: &str) -> String {
        format!("{}-{}-{}", prefix, workspace_id, tab_id)
    }

    fn session_state(&self, name: &str) -> Result<SessionState, BackendError> {
        self.record(format!("session_state {}", name))?;
        Ok(*self.state.lock().unwrap())
    }

    fn kill(&self, name: &str) -> Result<(), BackendError> {
        self.record(format!("kill {}", name))
    }

    fn capture_pane(&self, name: &str) -> Result<Vec<u8>, BackendError> {
        self.record(format!("capture_pane {}", name))?;
        Ok(self.captured.clone())
    }

    fn set_session_tag(&self, name: &str, key: &str, value: &str) -> Result<(), BackendError> {
        let _ = value;
        self.record(format!("set_session_tag {} {}", name, key))
    }

    fn spawn_command(&self, name: &str, agent_command: &str) -> CommandBuilder {
        self.calls
            .lock()
            .unwrap()
            .push(format!("spawn_command {} {}", name, agent_command));
        CommandBuilder::new("cat")
    }

    fn attach_command(&self, name: &str) -> CommandBuilder {
        self.calls
            .lock()
            .unwrap()
            .push(format!("attach_command {}", name));
        CommandBuilder::new("cat")
    }
}
