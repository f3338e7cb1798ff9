//! PTY client handle for an attached tab.
//!
//! Wraps portable-pty: one master/child pair per attached tab, a shared
//! writer for input, and cloned readers handed to the reader pipeline.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tracing::{debug, info};

use crate::term::errors::PtyError;

/// A live PTY client attached to a multiplexer session.
pub struct AgentPty {
    /// Master end of the PTY. Used for resize and cloning readers.
    master: Mutex<Box<dyn MasterPty + Send>>,
    /// Client process handle (the multiplexer attach client).
    child: Mutex<Box<dyn Child + Send + Sync>>,
    /// Writer to PTY stdin. Arc so the VT response writer can hold a weak
    /// handle without keeping a closed agent alive.
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    /// Last size sent to the kernel, compared before resizing.
    size: Mutex<(u16, u16)>,
    closed: AtomicBool,
}

impl std::fmt::Debug for AgentPty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentPty")
            .field("size", &self.size())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl AgentPty {
    /// Open a PTY and spawn the given command in it.
    pub fn spawn(cmd: CommandBuilder, rows: u16, cols: u16) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system.openpty(size).map_err(|e| PtyError::Open {
            message: format!("openpty: {}", e),
        })?;

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn {
                message: e.to_string(),
            })?;
        // Drop our copy of the slave fd. The child process inherited it during
        // spawn, so it remains open there. If we kept ours, the kernel would
        // never deliver EOF on the master when the child exits.
        drop(pair.slave);

        let writer = pair.master.take_writer().map_err(|e| PtyError::Open {
            message: format!("take_writer: {}", e),
        })?;

        info!(
            event = "core.pty.spawn_completed",
            pid = ?child.process_id(),
            rows = rows,
            cols = cols,
        );

        Ok(Self {
            master: Mutex::new(pair.master),
            child: Mutex::new(child),
            writer: Arc::new(Mutex::new(writer)),
            size: Mutex::new((rows, cols)),
            closed: AtomicBool::new(false),
        })
    }

    /// Clone the PTY master reader for the reader pipeline.
    pub fn clone_reader(&self) -> Result<Box<dyn Read + Send>, PtyError> {
        let master = self
            .master
            .lock()
            .map_err(|_| PtyError::LockPoisoned { what: "master" })?;
        master.try_clone_reader().map_err(|e| PtyError::Open {
            message: format!("clone reader: {}", e),
        })
    }

    /// Write bytes to PTY stdin.
    pub fn send_bytes(&self, data: &[u8]) -> Result<(), PtyError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| PtyError::LockPoisoned { what: "writer" })?;
        writer.write_all(data).map_err(|e| PtyError::Write {
            message: e.to_string(),
        })?;
        writer.flush().map_err(|e| PtyError::Write {
            message: e.to_string(),
        })
    }

    pub fn send_string(&self, data: &str) -> Result<(), PtyError> {
        self.send_bytes(data.as_bytes())
    }

    /// Resize the PTY if the size actually changed.
    pub fn set_size(&self, rows: u16, cols: u16) -> Result<(), PtyError> {
        {
            let mut size = self
                .size
                .lock()
                .map_err(|_| PtyError::LockPoisoned { what: "size" })?;
            if *size == (rows, cols) {
                return Ok(());
            }
            *size = (rows, cols);
        }

        let master = self
            .master
            .lock()
            .map_err(|_| PtyError::LockPoisoned { what: "master" })?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Resize {
                message: e.to_string(),
            })?;
        debug!(event = "core.pty.resize_completed", rows = rows, cols = cols);
        Ok(())
    }

    pub fn size(&self) -> (u16, u16) {
        self.size.lock().map(|s| *s).unwrap_or((0, 0))
    }

    /// Whether the PTY client is gone: closed explicitly, or its process has
    /// already exited.
    pub fn is_closed(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return true;
        }
        match self.child.lock() {
            Ok(mut child) => matches!(child.try_wait(), Ok(Some(_))),
            Err(_) => true,
        }
    }

    /// Kill the client process and mark the PTY closed. Idempotent; the
    /// multiplexer session behind the client stays alive.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut child) = self.child.lock() {
            if let Err(e) = child.kill() {
                debug!(event = "core.pty.close_kill_failed", error = %e);
            }
        }
        info!(event = "core.pty.close_completed");
    }

    pub fn process_id(&self) -> Option<u32> {
        self.child.lock().ok().and_then(|c| c.process_id())
    }

    /// A weak write handle for the VT response writer. Writes are dropped
    /// once the agent is gone.
    pub fn writer_handle(&self) -> PtyWriterHandle {
        PtyWriterHandle {
            writer: Arc::downgrade(&self.writer),
        }
    }
}

impl Drop for AgentPty {
    fn drop(&mut self) {
        self.close();
    }
}

/// Weak handle to an agent's stdin writer.
///
/// Held by the VT emulator's response-writer closure so terminal query
/// replies (cursor position, device attributes) can reach the PTY without a
/// reference cycle through the tab.
#[derive(Clone)]
pub struct PtyWriterHandle {
    writer: Weak<Mutex<Box<dyn Write + Send>>>,
}

impl PtyWriterHandle {
    /// Write bytes if the agent is still alive. Returns false when the write
    /// was dropped.
    pub fn write(&self, data: &[u8]) -> bool {
        let Some(writer) = self.writer.upgrade() else {
            debug!(event = "core.pty.response_dropped", bytes = data.len());
            return false;
        };
        let Ok(mut writer) = writer.lock() else {
            return false;
        };
        writer.write_all(data).and_then(|_| writer.flush()).is_ok()
    }
}
