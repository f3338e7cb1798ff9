//! Configuration loading and merging.
//!
//! Configuration is loaded in the following order (later sources override
//! earlier ones):
//! 1. **Hardcoded defaults** - Built-in fallback values
//! 2. **User config** - `~/.muxpane/config.toml`
//! 3. **Project config** - `./.muxpane/config.toml`
//! 4. **CLI arguments** - applied by the host binary (highest priority)

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::types::{MuxConfig, PaneConfig};
use crate::errors::ConfigError;

/// Load the resolved pane configuration from the config hierarchy.
///
/// Missing config files are not errors; parse failures are.
pub fn load_config() -> Result<PaneConfig, ConfigError> {
    let mut config = MuxConfig::default();

    if let Some(home) = dirs::home_dir() {
        if let Some(user) = load_config_file(&home.join(".muxpane").join("config.toml"))? {
            config = merge_configs(config, user);
        }
    }

    let project_path = std::env::current_dir()
        .map(|d| d.join(".muxpane").join("config.toml"))
        .unwrap_or_else(|_| PathBuf::from(".muxpane/config.toml"));
    if let Some(project) = load_config_file(&project_path)? {
        config = merge_configs(config, project);
    }

    let state_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".muxpane");

    Ok(PaneConfig::from_file_config(config, state_dir))
}

/// Load a single config file. Returns Ok(None) when the file does not exist.
fn load_config_file(path: &Path) -> Result<Option<MuxConfig>, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(event = "core.config.file_absent", path = %path.display());
            return Ok(None);
        }
        Err(e) => return Err(ConfigError::IoError { source: e }),
    };

    let config: MuxConfig =
        toml::from_str(&content).map_err(|e| ConfigError::ConfigParseError {
            message: format!("{}: {}", path.display(), e),
        })?;

    debug!(event = "core.config.file_loaded", path = %path.display());
    Ok(Some(config))
}

/// Merge two configurations, with `override_config` taking precedence.
///
/// Assistant entries are merged key-by-key with override entries replacing
/// base entries of the same name.
pub fn merge_configs(base: MuxConfig, override_config: MuxConfig) -> MuxConfig {
    let mut assistants = base.assistants;
    for (name, settings) in override_config.assistants {
        assistants.insert(name, settings);
    }

    MuxConfig {
        pane: override_config.pane,
        session: override_config.session,
        assistants,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::AssistantSettings;

    #[test]
    fn test_load_config_file_missing_is_none() {
        let result = load_config_file(Path::new("/nonexistent/muxpane/config.toml"));
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn test_load_config_file_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "not [ valid toml").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ConfigParseError { .. }));
    }

    #[test]
    fn test_load_config_file_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[pane]\nmax_attached = 3\n").unwrap();

        let config = load_config_file(&path).unwrap().unwrap();
        assert_eq!(config.pane.max_attached, 3);
    }

    #[test]
    fn test_merge_configs_assistants_override_by_name() {
        let mut base = MuxConfig::default();
        base.assistants.insert(
            "claude".to_string(),
            AssistantSettings {
                startup_command: Some("claude-old".to_string()),
                flags: None,
            },
        );
        base.assistants.insert(
            "codex".to_string(),
            AssistantSettings {
                startup_command: Some("codex".to_string()),
                flags: None,
            },
        );

        let mut overlay = MuxConfig::default();
        overlay.assistants.insert(
            "claude".to_string(),
            AssistantSettings {
                startup_command: Some("claude-new".to_string()),
                flags: None,
            },
        );

        let merged = merge_configs(base, overlay);
        assert_eq!(
            merged.assistants["claude"].startup_command,
            Some("claude-new".to_string())
        );
        // Entries only present in the base survive the merge
        assert_eq!(
            merged.assistants["codex"].startup_command,
            Some("codex".to_string())
        );
    }
}
