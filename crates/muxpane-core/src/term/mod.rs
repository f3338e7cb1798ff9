//! PTY client and VT emulator handles owned by a tab.

pub mod errors;
pub mod pty;
pub mod vt;

pub use errors::PtyError;
pub use pty::{AgentPty, PtyWriterHandle};
pub use vt::{VtScreen, VtSnapshot};
