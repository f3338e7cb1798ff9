//! VT emulator handle for a tab.
//!
//! Wraps alacritty_terminal's `Term` plus its ANSI processor behind the
//! operations the pane core needs: byte writes, view scrolling, selection in
//! absolute scrollback coordinates, and a response writer for terminal
//! queries (cursor position, device attributes).
//!
//! The version counter is bumped on any visual mutation so renderers can
//! cache snapshots.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use alacritty_terminal::event::{Event as AlacEvent, EventListener};
use alacritty_terminal::grid::{Dimensions, Scroll};
use alacritty_terminal::index::{Column, Line, Point, Side};
use alacritty_terminal::selection::{Selection, SelectionType};
use alacritty_terminal::term::{Config as TermConfig, Term, TermMode};
use alacritty_terminal::vte::ansi::Processor;
use tracing::{debug, warn};

/// Size implementation satisfying alacritty_terminal's Dimensions trait.
struct TermDimensions {
    cols: usize,
    screen_lines: usize,
}

impl Dimensions for TermDimensions {
    fn total_lines(&self) -> usize {
        self.screen_lines
    }
    fn screen_lines(&self) -> usize {
        self.screen_lines
    }
    fn columns(&self) -> usize {
        self.cols
    }
}

/// Event listener that parks emulator events until the owner drains them.
///
/// Events are produced synchronously while the terminal lock is held, so
/// they cannot be acted on inline; `VtScreen` drains the queue after every
/// write and hands `PtyWrite` payloads to the response writer.
struct EventQueue {
    queue: Arc<Mutex<VecDeque<AlacEvent>>>,
}

impl EventListener for EventQueue {
    fn send_event(&self, event: AlacEvent) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(event);
        }
    }
}

/// Plain-text snapshot of the visible screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VtSnapshot {
    pub lines: Vec<String>,
    /// Cursor position as (col, row) when it is on the visible screen.
    pub cursor: Option<(usize, usize)>,
    pub version: u64,
}

type ResponseWriter = Box<dyn FnMut(&[u8]) + Send>;

pub struct VtScreen {
    term: Term<EventQueue>,
    parser: Processor,
    events: Arc<Mutex<VecDeque<AlacEvent>>>,
    response_writer: Option<ResponseWriter>,
    version: u64,
    wrote_any: bool,
    rows: u16,
    cols: u16,
}

impl std::fmt::Debug for VtScreen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VtScreen")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl VtScreen {
    pub fn new(cols: u16, rows: u16) -> Self {
        let events = Arc::new(Mutex::new(VecDeque::new()));
        let listener = EventQueue {
            queue: events.clone(),
        };
        let dims = TermDimensions {
            cols: cols.max(1) as usize,
            screen_lines: rows.max(1) as usize,
        };
        let term = Term::new(TermConfig::default(), &dims, listener);
        Self {
            term,
            parser: Processor::new(),
            events,
            response_writer: None,
            version: 1,
            wrote_any: false,
            rows: rows.max(1),
            cols: cols.max(1),
        }
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    /// Monotonic counter bumped on any visual mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether any bytes were ever written (including seeded scrollback).
    pub fn is_empty(&self) -> bool {
        !self.wrote_any
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        if cols == self.cols && rows == self.rows {
            return;
        }
        self.cols = cols.max(1);
        self.rows = rows.max(1);
        self.term.resize(TermDimensions {
            cols: self.cols as usize,
            screen_lines: self.rows as usize,
        });
        self.version += 1;
        self.drain_events();
    }

    /// Feed output bytes through the emulator.
    pub fn write(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.parser.advance(&mut self.term, bytes);
        self.wrote_any = true;
        self.version += 1;
        self.drain_events();
    }

    /// Replay captured pane contents into a VT that has never been written.
    ///
    /// Captured bytes are opaque; replaying them over existing content would
    /// duplicate scrollback, so a non-empty VT refuses the prepend.
    pub fn prepend_scrollback(&mut self, bytes: &[u8]) {
        if self.wrote_any {
            warn!(
                event = "core.vt.prepend_skipped_nonempty",
                bytes = bytes.len()
            );
            return;
        }
        if bytes.is_empty() {
            return;
        }
        debug!(event = "core.vt.scrollback_seeded", bytes = bytes.len());
        self.write(bytes);
    }

    /// Install the writer used to answer terminal queries. Replies produced
    /// before a writer is installed are dropped.
    pub fn set_response_writer(&mut self, writer: ResponseWriter) {
        self.response_writer = Some(writer);
    }

    fn drain_events(&mut self) {
        let drained: Vec<AlacEvent> = match self.events.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(_) => return,
        };
        for event in drained {
            if let AlacEvent::PtyWrite(text) = event {
                match self.response_writer.as_mut() {
                    Some(writer) => writer(text.as_bytes()),
                    None => debug!(event = "core.vt.response_unwritable", bytes = text.len()),
                }
            }
        }
    }

    // ---- scrollback coordinates ----

    fn history(&self) -> usize {
        let grid = self.term.grid();
        grid.total_lines().saturating_sub(grid.screen_lines())
    }

    /// Convert a visible screen row to an absolute scrollback line.
    pub fn screen_y_to_absolute_line(&self, y: usize) -> usize {
        let offset = self.term.grid().display_offset() as i32;
        let line = y.min(self.rows as usize - 1) as i32 - offset;
        (line + self.history() as i32).max(0) as usize
    }

    fn line_from_absolute(&self, line_abs: usize) -> Line {
        let history = self.history() as i32;
        let line = line_abs as i32 - history;
        let top = -history;
        let bottom = self.term.grid().screen_lines() as i32 - 1;
        Line(line.clamp(top, bottom))
    }

    // ---- selection ----

    pub fn set_selection(
        &mut self,
        start_x: usize,
        start_line_abs: usize,
        end_x: usize,
        end_line_abs: usize,
        visible: bool,
        rectangle: bool,
    ) {
        if !visible {
            self.clear_selection();
            return;
        }
        let max_col = (self.cols as usize).saturating_sub(1);
        let start = Point::new(
            self.line_from_absolute(start_line_abs),
            Column(start_x.min(max_col)),
        );
        let end = Point::new(
            self.line_from_absolute(end_line_abs),
            Column(end_x.min(max_col)),
        );

        let ty = if rectangle {
            SelectionType::Block
        } else {
            SelectionType::Simple
        };
        let mut selection = Selection::new(ty, start, Side::Left);
        selection.update(end, Side::Right);
        self.term.selection = Some(selection);
        self.version += 1;
    }

    pub fn clear_selection(&mut self) {
        if self.term.selection.take().is_some() {
            self.version += 1;
        }
    }

    pub fn has_selection(&self) -> bool {
        self.term.selection.is_some()
    }

    pub fn selected_text(&self) -> Option<String> {
        self.term.selection_to_string()
    }

    // ---- view scrolling ----

    pub fn is_scrolled(&self) -> bool {
        self.term.grid().display_offset() != 0
    }

    /// (display offset, total lines including history).
    pub fn scroll_info(&self) -> (usize, usize) {
        let grid = self.term.grid();
        (grid.display_offset(), grid.total_lines())
    }

    /// Positive delta scrolls toward history, negative toward live output.
    pub fn scroll_view(&mut self, delta: i32) {
        if delta == 0 {
            return;
        }
        self.term.scroll_display(Scroll::Delta(delta));
        self.version += 1;
    }

    pub fn scroll_view_page(&mut self, sign: i32) {
        self.term.scroll_display(if sign > 0 {
            Scroll::PageUp
        } else {
            Scroll::PageDown
        });
        self.version += 1;
    }

    pub fn scroll_view_to_top(&mut self) {
        self.term.scroll_display(Scroll::Top);
        self.version += 1;
    }

    pub fn scroll_view_to_bottom(&mut self) {
        if self.is_scrolled() {
            self.term.scroll_display(Scroll::Bottom);
            self.version += 1;
        }
    }

    // ---- modes ----

    pub fn alt_screen(&self) -> bool {
        self.term.mode().contains(TermMode::ALT_SCREEN)
    }

    pub fn bracketed_paste(&self) -> bool {
        self.term.mode().contains(TermMode::BRACKETED_PASTE)
    }

    // ---- rendering ----

    /// Snapshot the visible screen as plain text rows.
    pub fn snapshot(&self, show_cursor: bool) -> VtSnapshot {
        let grid = self.term.grid();
        let offset = grid.display_offset() as i32;
        let rows = self.rows as usize;
        let cols = self.cols as usize;

        let mut lines = Vec::with_capacity(rows);
        for y in 0..rows {
            let line = Line(y as i32 - offset);
            let row = &grid[line];
            let mut text = String::with_capacity(cols);
            for x in 0..cols {
                text.push(row[Column(x)].c);
            }
            while text.ends_with(' ') {
                text.pop();
            }
            lines.push(text);
        }

        let cursor = if show_cursor
            && offset == 0
            && self.term.mode().contains(TermMode::SHOW_CURSOR)
        {
            let point = grid.cursor.point;
            Some((point.column.0, point.line.0.max(0) as usize))
        } else {
            None
        };

        VtSnapshot {
            lines,
            cursor,
            version: self.version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vt_with(lines: &[&str]) -> VtScreen {
        let mut vt = VtScreen::new(20, 4);
        for line in lines {
            vt.write(line.as_bytes());
            vt.write(b"\r\n");
        }
        vt
    }

    #[test]
    fn test_write_bumps_version_and_marks_nonempty() {
        let mut vt = VtScreen::new(80, 24);
        assert!(vt.is_empty());
        let v0 = vt.version();
        vt.write(b"hello");
        assert!(vt.version() > v0);
        assert!(!vt.is_empty());
    }

    #[test]
    fn test_snapshot_contains_written_text() {
        let vt = vt_with(&["alpha", "beta"]);
        let snap = vt.snapshot(true);
        assert_eq!(snap.lines[0], "alpha");
        assert_eq!(snap.lines[1], "beta");
    }

    #[test]
    fn test_snapshot_reuse_key_is_stable_without_mutation() {
        let vt = vt_with(&["alpha"]);
        let a = vt.snapshot(true);
        let b = vt.snapshot(true);
        assert_eq!(a.version, b.version);
        assert_eq!(a, b);
    }

    #[test]
    fn test_selection_round_trip() {
        let mut vt = vt_with(&["alpha", "beta"]);
        assert!(!vt.has_selection());

        let line = vt.screen_y_to_absolute_line(0);
        vt.set_selection(0, line, 4, line, true, false);
        assert!(vt.has_selection());
        let text = vt.selected_text().unwrap();
        assert_eq!(text.trim_end(), "alpha");

        vt.clear_selection();
        assert!(!vt.has_selection());
    }

    #[test]
    fn test_set_selection_invisible_clears() {
        let mut vt = vt_with(&["alpha"]);
        let line = vt.screen_y_to_absolute_line(0);
        vt.set_selection(0, line, 4, line, true, false);
        vt.set_selection(0, line, 4, line, false, false);
        assert!(!vt.has_selection());
    }

    #[test]
    fn test_scroll_into_history_and_back() {
        let mut vt = VtScreen::new(10, 3);
        for i in 0..20 {
            vt.write(format!("line{}\r\n", i).as_bytes());
        }
        assert!(!vt.is_scrolled());

        vt.scroll_view(2);
        assert!(vt.is_scrolled());
        let (offset, total) = vt.scroll_info();
        assert_eq!(offset, 2);
        assert!(total > 3);

        vt.scroll_view_to_bottom();
        assert!(!vt.is_scrolled());

        vt.scroll_view_to_top();
        assert!(vt.is_scrolled());
    }

    #[test]
    fn test_absolute_lines_stay_anchored_while_scrolling() {
        let mut vt = VtScreen::new(10, 3);
        for i in 0..10 {
            vt.write(format!("l{}\r\n", i).as_bytes());
        }
        let bottom_abs = vt.screen_y_to_absolute_line(2);
        vt.scroll_view(3);
        // Scrolling the view back shifts what row 2 maps to, by the offset.
        assert_eq!(vt.screen_y_to_absolute_line(2), bottom_abs - 3);
    }

    #[test]
    fn test_prepend_scrollback_only_when_empty() {
        let mut vt = VtScreen::new(20, 4);
        vt.prepend_scrollback(b"captured\r\n");
        assert!(!vt.is_empty());
        assert_eq!(vt.snapshot(false).lines[0], "captured");

        // A second prepend must not duplicate content.
        let version = vt.version();
        vt.prepend_scrollback(b"captured\r\n");
        assert_eq!(vt.version(), version);
    }

    #[test]
    fn test_response_writer_receives_query_replies() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();

        let mut vt = VtScreen::new(20, 4);
        vt.set_response_writer(Box::new(move |bytes| {
            sink.lock().unwrap().extend_from_slice(bytes);
        }));

        // Device status report: ESC [ 6 n asks for the cursor position.
        vt.write(b"\x1b[6n");
        let reply = captured.lock().unwrap().clone();
        assert!(
            reply.starts_with(b"\x1b["),
            "expected CSI reply, got: {:?}",
            reply
        );
    }

    #[test]
    fn test_alt_screen_flag() {
        let mut vt = VtScreen::new(20, 4);
        assert!(!vt.alt_screen());
        vt.write(b"\x1b[?1049h");
        assert!(vt.alt_screen());
        vt.write(b"\x1b[?1049l");
        assert!(!vt.alt_screen());
    }
}
