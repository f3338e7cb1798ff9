//! Tab model and per-workspace registry.

pub mod registry;
pub mod types;

pub use registry::TabRegistry;
pub use types::{
    ReaderHandle, RestartDecision, RestartState, Tab, TabId, TabInner, TabShared, TabStatus,
    WorkspaceId,
};
