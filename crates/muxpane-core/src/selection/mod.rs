//! Mouse selection state for a tab.
//!
//! Coordinates are absolute scrollback lines (counted from the top of the
//! VT's history) so a selection stays anchored while the view scrolls.
//! The generation counter invalidates auto-scroll ticks that were scheduled
//! before the selection changed.

/// Current selection span. `active` is true only while a drag is in
/// progress; a finished selection stays visible with `active == false`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SelectionState {
    pub active: bool,
    pub start_x: usize,
    pub start_line_abs: usize,
    pub end_x: usize,
    pub end_line_abs: usize,
    /// Monotonic per-tab generation, bumped on every new drag.
    pub generation: u64,
}

impl SelectionState {
    /// Begin a fresh 1x1 selection at the given absolute point.
    pub fn begin(&mut self, x: usize, line_abs: usize) {
        self.active = true;
        self.start_x = x;
        self.start_line_abs = line_abs;
        self.end_x = x;
        self.end_line_abs = line_abs;
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn reset(&mut self) {
        let generation = self.generation;
        *self = SelectionState::default();
        self.generation = generation;
    }
}

/// Auto-scroll state while a drag escapes the viewport.
///
/// `dir` is +1 when the drag is above the viewport (view scrolls toward
/// history), -1 below it, 0 inside it. `ticking` is true while a scroll
/// tick round-trip is in flight.
#[derive(Clone, Copy, Debug, Default)]
pub struct SelectionScroll {
    pub dir: i8,
    pub ticking: bool,
}
