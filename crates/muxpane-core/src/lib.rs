//! muxpane-core: center pane core of a terminal-UI agent multiplexer
//!
//! This library hosts many concurrent PTY-backed assistant sessions as tabs,
//! grouped per workspace, against a tmux-like session backend. It owns the
//! PTY-to-VT streaming pipeline, the output flush engine, the tab actor that
//! serializes terminal mutations, the mouse selection state machine, and the
//! tab lifecycle (attach/detach/reattach/restart/close).
//!
//! # Main Entry Points
//!
//! - [`model::CenterPane`] - The pane model: owns tabs, processes messages
//! - [`lifecycle`] - Create, detach, reattach, restart, close tabs
//! - [`backend`] - Session multiplexer backend (tmux)
//! - [`persist`] - Workspace snapshot save/restore
//! - [`config`] - Configuration management

pub mod actor;
pub mod backend;
pub mod config;
pub mod errors;
pub mod flush;
pub mod input;
pub mod lifecycle;
pub mod logging;
pub mod messages;
pub mod model;
pub mod persist;
pub mod reader;
pub mod render;
pub mod selection;
pub mod tabs;
pub mod term;
pub mod viewer;

// Re-export commonly used types at crate root for convenience
pub use backend::{SessionBackend, SessionState, TmuxBackend};
pub use config::PaneConfig;
pub use messages::{Message, MsgSink, TabEvent, TabEventKind, ToastLevel};
pub use model::CenterPane;
pub use persist::{OpenTabEntry, WorkspaceSnapshot};
pub use tabs::{Tab, TabId, TabStatus, WorkspaceId};
pub use viewer::{Viewer, ViewerInput};

// Re-export logging initialization
pub use logging::init_logging;
