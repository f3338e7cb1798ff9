//! tmux implementation of the session backend.
//!
//! Every RPC shells out to the tmux CLI so the pane inherits whatever tmux
//! server the user already runs. Session names are validated before they are
//! interpolated into argv, and targets are prefixed with `=` so tmux matches
//! them exactly instead of by prefix.

use portable_pty::CommandBuilder;
use tracing::{debug, warn};

use crate::backend::errors::BackendError;
use crate::backend::traits::{SessionBackend, SessionState};

const TAG_OPTION_PREFIX: &str = "@muxpane_";

pub struct TmuxBackend {
    tmux_bin: String,
}

impl TmuxBackend {
    pub fn new() -> Self {
        Self {
            tmux_bin: "tmux".to_string(),
        }
    }

    pub fn with_binary(tmux_bin: impl Into<String>) -> Self {
        Self {
            tmux_bin: tmux_bin.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<std::process::Output, BackendError> {
        debug!(event = "core.backend.tmux_rpc", args = ?args);
        std::process::Command::new(&self.tmux_bin)
            .args(args)
            .output()
            .map_err(|e| BackendError::Rpc {
                command: args.first().unwrap_or(&"tmux").to_string(),
                message: format!("failed to execute tmux: {}", e),
            })
    }

    fn run_checked(&self, args: &[&str]) -> Result<std::process::Output, BackendError> {
        let output = self.run(args)?;
        if output.status.success() {
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(BackendError::Rpc {
                command: args.first().unwrap_or(&"tmux").to_string(),
                message: stderr.trim().to_string(),
            })
        }
    }
}

impl Default for TmuxBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a session name before it reaches tmux argv.
///
/// Rejects names that start with `-` (option injection), contain control
/// characters, or contain the `:` / `.` target separators tmux parses.
pub fn validate_session_name(name: &str) -> Result<(), BackendError> {
    if name.is_empty() {
        return Err(BackendError::InvalidName {
            name: name.to_string(),
            reason: "empty".to_string(),
        });
    }
    if name.starts_with('-') {
        return Err(BackendError::InvalidName {
            name: name.to_string(),
            reason: "must not start with '-'".to_string(),
        });
    }
    if name.chars().any(|c| c.is_control() || c == ':' || c == '.') {
        return Err(BackendError::InvalidName {
            name: name.to_string(),
            reason: "contains control characters or target separators".to_string(),
        });
    }
    Ok(())
}

/// Sanitize a workspace id for embedding in a session name.
fn name_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "ws".to_string()
    } else {
        cleaned
    }
}

impl SessionBackend for TmuxBackend {
    fn name(&self) -> &'static str {
        "tmux"
    }

    fn session_name(&self, prefix: &str, workspace_id: &str, tab_id: &str) -> String {
        format!(
            "{}-{}-{}",
            name_component(prefix),
            name_component(workspace_id),
            name_component(tab_id)
        )
    }

    fn session_state(&self, name: &str) -> Result<SessionState, BackendError> {
        validate_session_name(name)?;
        let target = format!("={}", name);

        let has_session = self.run(&["has-session", "-t", &target])?;
        if !has_session.status.success() {
            return Ok(SessionState {
                exists: false,
                has_live_pane: false,
            });
        }

        // A session can outlive its process: remain-on-exit leaves dead panes
        // behind. Count a pane as live only when tmux reports pane_dead == 0.
        let panes = self.run(&["list-panes", "-t", &target, "-F", "#{pane_dead}"])?;
        let has_live_pane = panes.status.success()
            && String::from_utf8_lossy(&panes.stdout)
                .lines()
                .any(|line| line.trim() == "0");

        Ok(SessionState {
            exists: true,
            has_live_pane,
        })
    }

    fn kill(&self, name: &str) -> Result<(), BackendError> {
        validate_session_name(name)?;
        let target = format!("={}", name);
        let output = self.run(&["kill-session", "-t", &target])?;
        if !output.status.success() {
            // Absent sessions are fine; anything else is worth a warning but
            // kill is always best-effort for callers.
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("can't find session") && !stderr.contains("no server running") {
                warn!(
                    event = "core.backend.kill_failed",
                    session = name,
                    stderr = %stderr.trim()
                );
            }
        }
        Ok(())
    }

    fn capture_pane(&self, name: &str) -> Result<Vec<u8>, BackendError> {
        validate_session_name(name)?;
        let target = format!("={}", name);
        let output =
            self.run_checked(&["capture-pane", "-p", "-e", "-t", &target, "-S", "-"])?;
        Ok(output.stdout)
    }

    fn set_session_tag(&self, name: &str, key: &str, value: &str) -> Result<(), BackendError> {
        validate_session_name(name)?;
        let target = format!("={}", name);
        let option = format!("{}{}", TAG_OPTION_PREFIX, key);
        self.run_checked(&["set-option", "-t", &target, &option, value])?;
        Ok(())
    }

    fn spawn_command(&self, name: &str, agent_command: &str) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.tmux_bin);
        cmd.args([
            "new-session",
            "-A",
            "-s",
            name,
            "sh",
            "-c",
            agent_command,
        ]);
        cmd
    }

    fn attach_command(&self, name: &str) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.tmux_bin);
        cmd.args(["attach-session", "-t", &format!("={}", name)]);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_session_name_rejects_injection() {
        assert!(validate_session_name("-kill-server").is_err());
        assert!(validate_session_name("a:b").is_err());
        assert!(validate_session_name("a.b").is_err());
        assert!(validate_session_name("a\nb").is_err());
        assert!(validate_session_name("").is_err());
        assert!(validate_session_name("muxpane-dev-7").is_ok());
    }

    #[test]
    fn test_session_name_is_deterministic_and_sanitized() {
        let backend = TmuxBackend::new();
        assert_eq!(
            backend.session_name("muxpane", "dev", "7"),
            "muxpane-dev-7"
        );
        assert_eq!(
            backend.session_name("muxpane", "my ws:1", "7"),
            "muxpane-my_ws_1-7"
        );
        // Derived names always pass validation
        validate_session_name(&backend.session_name("mp", "a b.c", "12")).unwrap();
    }

    #[test]
    fn test_spawn_command_uses_attach_or_create() {
        let backend = TmuxBackend::new();
        let cmd = backend.spawn_command("muxpane-dev-1", "claude");
        let argv: Vec<String> = cmd
            .get_argv()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(argv.contains(&"new-session".to_string()));
        assert!(argv.contains(&"-A".to_string()));
        assert!(argv.contains(&"muxpane-dev-1".to_string()));
    }

    #[test]
    fn test_session_state_missing_session() {
        // Point at a binary that always fails to simulate "no session".
        let backend = TmuxBackend::with_binary("false");
        let state = backend.session_state("muxpane-dev-1").unwrap();
        assert!(!state.exists);
        assert!(!state.has_live_pane);
    }
}
