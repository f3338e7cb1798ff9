//! Output flush engine: pending-byte buffering and adaptive flush timing.
//!
//! PTY output is not written to the VT as it arrives; it is buffered per tab
//! and flushed on a scheduled tick. Two timing parameters steer the tick:
//! `quiet` (idle gap after the last output before flushing) and `max` (hard
//! deadline from the first buffered byte). Bulk output (builds, logs) trips
//! a backpressure clamp that slows both so the renderer is not thrashed.

use std::collections::VecDeque;
use std::time::Duration;

/// Hard cap on buffered output per tab. Excess drops from the head: the
/// most recent screen state wins over old scrollback history.
pub const PENDING_HARD_CAP: usize = 8 * 1024 * 1024;

/// Bytes handed to the actor per flush dispatch.
pub const FLUSH_CHUNK: usize = 32 * 1024;
/// The active tab gets bigger chunks; its latency is what the user sees.
pub const FLUSH_CHUNK_ACTIVE: usize = 64 * 1024;

pub const QUIET_NORMAL: Duration = Duration::from_millis(4);
pub const MAX_NORMAL: Duration = Duration::from_millis(16);
/// Alt-screen TUIs repaint in bursts; give them a wider window.
pub const QUIET_ALT: Duration = Duration::from_millis(8);
pub const MAX_ALT: Duration = Duration::from_millis(32);

pub const INACTIVE_QUIET_FACTOR: u32 = 4;
pub const INACTIVE_QUIET_CAP: Duration = Duration::from_millis(250);

/// Minimum flush period once pending exceeds 8x the screen size.
pub const BACKPRESSURE_FLOOR: Duration = Duration::from_millis(32);

/// Re-arm delay when a flush leaves bytes behind.
pub const FLUSH_REARM: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushTimings {
    pub quiet: Duration,
    pub max: Duration,
}

/// Compute the quiet/max window for a tab's current state.
pub fn flush_timings(
    alt_screen: bool,
    active_tab: bool,
    pending_len: usize,
    cols: u16,
    rows: u16,
) -> FlushTimings {
    let (mut quiet, mut max) = if alt_screen {
        (QUIET_ALT, MAX_ALT)
    } else {
        (QUIET_NORMAL, MAX_NORMAL)
    };

    if !active_tab {
        quiet = (quiet * INACTIVE_QUIET_FACTOR).min(INACTIVE_QUIET_CAP);
    }

    let screen_bytes = 8 * cols as usize * rows as usize;
    if screen_bytes > 0 && pending_len > screen_bytes {
        quiet = quiet.max(BACKPRESSURE_FLOOR);
        max = max.max(BACKPRESSURE_FLOOR);
    }

    FlushTimings { quiet, max }
}

/// Append-only pending byte buffer with head-drop at the hard cap.
pub struct PendingOutput {
    buf: VecDeque<u8>,
    cap: usize,
    dropped_bytes: u64,
}

impl PendingOutput {
    pub fn new() -> Self {
        Self::with_capacity(PENDING_HARD_CAP)
    }

    pub fn with_capacity(cap: usize) -> Self {
        assert!(cap > 0, "PendingOutput capacity must be non-zero");
        Self {
            buf: VecDeque::new(),
            cap,
            dropped_bytes: 0,
        }
    }

    /// Append bytes, evicting from the head once over the cap.
    pub fn append(&mut self, data: &[u8]) {
        if data.len() >= self.cap {
            // The incoming chunk alone overflows: everything buffered plus
            // the chunk's own head is dropped.
            self.dropped_bytes += (self.buf.len() + data.len() - self.cap) as u64;
            self.buf.clear();
            self.buf.extend(&data[data.len() - self.cap..]);
            return;
        }

        let overflow = (self.buf.len() + data.len()).saturating_sub(self.cap);
        if overflow > 0 {
            self.buf.drain(..overflow);
            self.dropped_bytes += overflow as u64;
        }
        self.buf.extend(data);
    }

    /// Remove and return up to `n` bytes from the front.
    pub fn take(&mut self, n: usize) -> Vec<u8> {
        let n = n.min(self.buf.len());
        self.buf.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Total bytes dropped from the head since creation.
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }
}

impl Default for PendingOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_take_preserve_order() {
        let mut pending = PendingOutput::new();
        pending.append(b"abc");
        pending.append(b"def");
        assert_eq!(pending.len(), 6);

        assert_eq!(pending.take(4), b"abcd");
        assert_eq!(pending.take(10), b"ef");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_overflow_drops_from_head() {
        let mut pending = PendingOutput::with_capacity(5);
        pending.append(b"abcde");
        pending.append(b"fg");
        assert_eq!(pending.len(), 5);
        assert_eq!(pending.dropped_bytes(), 2);
        assert_eq!(pending.take(5), b"cdefg");
    }

    #[test]
    fn test_oversized_chunk_keeps_its_tail() {
        let mut pending = PendingOutput::with_capacity(4);
        pending.append(b"xy");
        pending.append(b"abcdefgh");
        assert_eq!(pending.len(), 4);
        assert_eq!(pending.take(4), b"efgh");
        // Dropped: the 2 buffered bytes plus the chunk's 4-byte head.
        assert_eq!(pending.dropped_bytes(), 6);
    }

    #[test]
    fn test_default_cap_is_eight_mib() {
        let pending = PendingOutput::new();
        assert_eq!(pending.cap, 8 * 1024 * 1024);
    }

    #[test]
    fn test_timings_normal_vs_alt() {
        let normal = flush_timings(false, true, 0, 80, 24);
        assert_eq!(normal.quiet, Duration::from_millis(4));
        assert_eq!(normal.max, Duration::from_millis(16));

        let alt = flush_timings(true, true, 0, 80, 24);
        assert_eq!(alt.quiet, Duration::from_millis(8));
        assert_eq!(alt.max, Duration::from_millis(32));
    }

    #[test]
    fn test_timings_inactive_tab_stretches_quiet_only() {
        let t = flush_timings(false, false, 0, 80, 24);
        assert_eq!(t.quiet, Duration::from_millis(16));
        assert_eq!(t.max, Duration::from_millis(16));
    }

    #[test]
    fn test_timings_backpressure_floor() {
        // 8 * 80 * 24 = 15360; anything above trips the clamp.
        let t = flush_timings(false, true, 20_000, 80, 24);
        assert_eq!(t.quiet, BACKPRESSURE_FLOOR);
        assert_eq!(t.max, BACKPRESSURE_FLOOR);

        // Alt-screen max already satisfies the floor and is unchanged.
        let alt = flush_timings(true, true, 20_000, 80, 24);
        assert_eq!(alt.quiet, BACKPRESSURE_FLOOR);
        assert_eq!(alt.max, Duration::from_millis(32));
    }

    #[test]
    fn test_timings_inactive_quiet_cap() {
        let t = flush_timings(true, false, 0, 80, 24);
        // 8ms * 4 = 32ms, well under the 250ms cap.
        assert_eq!(t.quiet, Duration::from_millis(32));
    }
}
