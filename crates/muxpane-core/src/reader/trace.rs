//! PTY trace files, gated by the `PTY_TRACE` environment variable.
//!
//! `PTY_TRACE` semantics: empty, `0`, or `false` disables tracing; `1`,
//! `true`, `all`, or `*` enables it for every assistant; anything else is a
//! comma-separated allow-list of assistant names. Each traced tab writes a
//! hex dump of its raw PTY chunks to a per-tab file, capped at 256 KiB of
//! chunk bytes, then the file gets a `TRUCATED` marker and goes quiet.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use tracing::{debug, warn};

pub const TRACE_ENV: &str = "PTY_TRACE";
pub const TRACE_CAP_BYTES: usize = 256 * 1024;
const TRUNCATION_MARKER: &[u8] = b"TRUCATED\n";

/// Whether tracing is enabled for an assistant, per the process env.
pub fn trace_enabled(assistant: &str) -> bool {
    match std::env::var(TRACE_ENV) {
        Ok(value) => trace_enabled_in(&value, assistant),
        Err(_) => false,
    }
}

/// Testable core of [`trace_enabled`].
pub fn trace_enabled_in(value: &str, assistant: &str) -> bool {
    let value = value.trim();
    match value {
        "" | "0" | "false" => false,
        "1" | "true" | "all" | "*" => true,
        list => list
            .split(',')
            .any(|entry| entry.trim().eq_ignore_ascii_case(assistant)),
    }
}

/// An open per-tab trace file.
pub struct TraceFile {
    file: File,
    written: usize,
    done: bool,
}

impl TraceFile {
    /// Create `<dir>/tab-<ws>-<id>.trace`. Failures disable tracing for the
    /// tab rather than failing the attach.
    pub fn create(dir: &Path, ws: &str, tab: &str) -> Option<Self> {
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!(event = "core.reader.trace_dir_failed", error = %e);
            return None;
        }
        let path = dir.join(format!("tab-{}-{}.trace", ws, tab));
        match File::create(&path) {
            Ok(file) => {
                debug!(event = "core.reader.trace_opened", path = %path.display());
                Some(Self {
                    file,
                    written: 0,
                    done: false,
                })
            }
            Err(e) => {
                warn!(event = "core.reader.trace_open_failed", path = %path.display(), error = %e);
                None
            }
        }
    }

    /// Record one raw PTY chunk. Stops writing once the cap is reached.
    pub fn record(&mut self, chunk: &[u8]) {
        if self.done || chunk.is_empty() {
            return;
        }

        let budget = TRACE_CAP_BYTES - self.written;
        let take = chunk.len().min(budget);
        let dump = hex_dump(&chunk[..take], self.written);
        if self.file.write_all(dump.as_bytes()).is_err() {
            self.done = true;
            return;
        }
        self.written += take;

        if self.written >= TRACE_CAP_BYTES {
            let _ = self.file.write_all(TRUNCATION_MARKER);
            let _ = self.file.flush();
            self.done = true;
        }
    }
}

/// Classic offset / hex / ascii dump, 16 bytes per row.
fn hex_dump(bytes: &[u8], base_offset: usize) -> String {
    let mut out = String::with_capacity(bytes.len() * 4);
    for (row, chunk) in bytes.chunks(16).enumerate() {
        out.push_str(&format!("{:08x}  ", base_offset + row * 16));
        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => out.push_str(&format!("{:02x} ", b)),
                None => out.push_str("   "),
            }
        }
        out.push(' ');
        out.push('|');
        for b in chunk {
            out.push(if b.is_ascii_graphic() || *b == b' ' {
                *b as char
            } else {
                '.'
            });
        }
        out.push_str("|\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_env_disabled_values() {
        assert!(!trace_enabled_in("", "claude"));
        assert!(!trace_enabled_in("0", "claude"));
        assert!(!trace_enabled_in("false", "claude"));
    }

    #[test]
    fn test_trace_env_enabled_for_all() {
        for value in ["1", "true", "all", "*"] {
            assert!(trace_enabled_in(value, "claude"), "value: {}", value);
            assert!(trace_enabled_in(value, "codex"), "value: {}", value);
        }
    }

    #[test]
    fn test_trace_env_allow_list() {
        assert!(trace_enabled_in("claude,codex", "claude"));
        assert!(trace_enabled_in("claude, codex", "codex"));
        assert!(!trace_enabled_in("claude,codex", "gemini"));
    }

    #[test]
    fn test_hex_dump_shape() {
        let dump = hex_dump(b"AB\x00", 0);
        assert!(dump.starts_with("00000000  41 42 00"));
        assert!(dump.contains("|AB.|"));
    }

    #[test]
    fn test_trace_file_caps_and_marks_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let mut trace = TraceFile::create(dir.path(), "ws1", "7").unwrap();

        let chunk = vec![0x41u8; 64 * 1024];
        for _ in 0..5 {
            trace.record(&chunk);
        }
        assert!(trace.done);

        let contents =
            std::fs::read_to_string(dir.path().join("tab-ws1-7.trace")).unwrap();
        assert!(contents.ends_with("TRUCATED\n"));

        // Further chunks are ignored once capped.
        let len = contents.len();
        trace.record(&chunk);
        let contents = std::fs::read_to_string(dir.path().join("tab-ws1-7.trace")).unwrap();
        assert_eq!(contents.len(), len);
    }
}
