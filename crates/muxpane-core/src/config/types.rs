//! Configuration type definitions for the muxpane pane core.
//!
//! These types are deserialized from TOML config files and resolved into a
//! runtime [`PaneConfig`].
//!
//! # Example Configuration
//!
//! ```toml
//! [pane]
//! max_attached = 4
//!
//! [session]
//! prefix = "mp"
//!
//! [assistants.claude]
//! startup_command = "claude"
//! flags = "--continue"
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Main configuration loaded from TOML config files.
///
/// Loaded from `~/.muxpane/config.toml`, then `./.muxpane/config.toml`;
/// project values override user values.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MuxConfig {
    /// Pane-level tunables.
    #[serde(default)]
    pub pane: PaneSettings,

    /// Session backend naming.
    #[serde(default)]
    pub session: SessionSettings,

    /// Per-assistant settings, keyed by assistant name.
    #[serde(default)]
    pub assistants: HashMap<String, AssistantSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaneSettings {
    /// Global cap on concurrently attached agent tabs. 0 disables the cap.
    #[serde(default = "super::defaults::default_max_attached")]
    pub max_attached: usize,

    /// Default assistant when none is specified.
    #[serde(default = "super::defaults::default_assistant")]
    pub default_assistant: String,
}

impl Default for PaneSettings {
    fn default() -> Self {
        Self {
            max_attached: super::defaults::default_max_attached(),
            default_assistant: super::defaults::default_assistant(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Prefix used when deriving multiplexer session names.
    #[serde(default = "super::defaults::default_session_prefix")]
    pub prefix: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            prefix: super::defaults::default_session_prefix(),
        }
    }
}

/// Per-assistant settings used in `[assistants.<name>]` sections.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AssistantSettings {
    /// Command spawned inside the multiplexer session.
    #[serde(default)]
    pub startup_command: Option<String>,

    /// Flags appended to the startup command.
    #[serde(default)]
    pub flags: Option<String>,
}

/// Resolved runtime configuration for the pane core.
#[derive(Debug, Clone)]
pub struct PaneConfig {
    pub max_attached: usize,
    pub default_assistant: String,
    pub session_prefix: String,
    pub assistants: HashMap<String, AssistantSettings>,
    /// Base directory for pane state (trace files, snapshots).
    pub state_dir: PathBuf,
}

impl PaneConfig {
    pub fn from_file_config(file: MuxConfig, state_dir: PathBuf) -> Self {
        Self {
            max_attached: file.pane.max_attached,
            default_assistant: file.pane.default_assistant,
            session_prefix: file.session.prefix,
            assistants: file.assistants,
            state_dir,
        }
    }

    /// Resolve the startup command for an assistant.
    ///
    /// Known assistants are `claude` (built in) plus anything configured
    /// under `[assistants.<name>]`. Unknown names are a user error.
    pub fn assistant_command(&self, assistant: &str) -> Result<String, ConfigError> {
        let settings = self.assistants.get(assistant);

        let base = settings
            .and_then(|s| s.startup_command.clone())
            .or_else(|| (assistant == "claude").then(|| "claude".to_string()))
            .ok_or_else(|| ConfigError::UnknownAssistant {
                assistant: assistant.to_string(),
            })?;

        let flags = settings.and_then(|s| s.flags.clone());
        Ok(match flags {
            Some(flags) if !flags.is_empty() => format!("{} {}", base, flags),
            _ => base,
        })
    }

    /// Whether the assistant name resolves to a spawnable command.
    pub fn knows_assistant(&self, assistant: &str) -> bool {
        self.assistant_command(assistant).is_ok()
    }
}

impl Default for PaneConfig {
    fn default() -> Self {
        let state_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".muxpane");
        Self::from_file_config(MuxConfig::default(), state_dir)
    }
}
