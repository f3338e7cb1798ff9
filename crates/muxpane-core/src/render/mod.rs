//! Renderer glue: chrome composition, viewport metrics, and cached VT
//! snapshots.
//!
//! The pane renders in two layers. `view_chrome_only` produces the border,
//! tab bar, blank terminal region, and help line; the terminal content is
//! overlaid separately from a cached [`VtSnapshot`]. `view` composites both
//! for hosts that want a single string. All geometry derives from
//! [`terminal_viewport`] so coordinate conversion and layout padding cannot
//! diverge.

use std::sync::Arc;

use crate::model::CenterPane;
use crate::tabs::{TabId, TabStatus};
use crate::term::vt::VtSnapshot;

/// Rows consumed by chrome: tab bar, top border, bottom border, help line.
const CHROME_ROWS: u16 = 4;
/// Columns consumed by the left and right border.
const CHROME_COLS: u16 = 2;

/// Content region of the pane, in host-screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl Viewport {
    pub fn contains(&self, col: u16, row: u16) -> bool {
        col >= self.x
            && col < self.x + self.width
            && row >= self.y
            && row < self.y + self.height
    }

    /// Host-screen to content coordinates. May be negative or past the
    /// extent, which is exactly what drag handling needs.
    pub fn to_local(&self, col: u16, row: u16) -> (isize, isize) {
        (
            col as isize - self.x as isize,
            row as isize - self.y as isize,
        )
    }
}

/// The single source of pane geometry.
pub fn terminal_viewport(width: u16, height: u16, offset_x: u16) -> Viewport {
    Viewport {
        x: offset_x + 1,
        y: 2,
        width: width.saturating_sub(CHROME_COLS).max(1),
        height: height.saturating_sub(CHROME_ROWS).max(1),
    }
}

/// Cache key plus payload for the active tab's snapshot.
pub struct SnapshotCache {
    pub tab: TabId,
    pub version: u64,
    pub show_cursor: bool,
    pub snapshot: Arc<VtSnapshot>,
}

impl CenterPane {
    pub fn terminal_viewport(&self) -> Viewport {
        terminal_viewport(self.width, self.height, self.offset_x)
    }

    /// Snapshot of the active tab's VT, reusing the cached copy while
    /// `(vt_version, show_cursor)` is unchanged.
    pub fn snapshot(&mut self) -> Option<Arc<VtSnapshot>> {
        let ws = self.workspace.clone();
        let show_cursor = self.focused;
        let tab = self.registry.active_tab(&ws)?;
        let tab_id = tab.id;
        let shared = tab.shared.clone();

        let inner = shared.lock();
        let vt = inner.vt.as_ref()?;

        if let Some(cache) = &self.snapshot_cache {
            if cache.tab == tab_id
                && cache.version == vt.version()
                && cache.show_cursor == show_cursor
            {
                return Some(cache.snapshot.clone());
            }
        }

        let snapshot = Arc::new(vt.snapshot(show_cursor));
        drop(inner);

        self.snapshot_cache = Some(SnapshotCache {
            tab: tab_id,
            version: snapshot.version,
            show_cursor,
            snapshot: snapshot.clone(),
        });
        Some(snapshot)
    }

    /// Chrome with a blank terminal region, byte-width identical to the
    /// content area `view` fills in.
    pub fn view_chrome_only(&self) -> String {
        self.render(None)
    }

    /// Full composition: chrome plus the given content lines (or the active
    /// viewer's output). Heights always match `view_chrome_only`.
    pub fn view(&mut self) -> String {
        let viewport = self.terminal_viewport();
        let content = self.content_lines(viewport);
        self.render(Some(content))
    }

    fn content_lines(&mut self, viewport: Viewport) -> Vec<String> {
        let ws = self.workspace.clone();
        if let Some(tab) = self.registry.active_tab(&ws) {
            let shared = tab.shared.clone();
            let inner = shared.lock();
            if let Some(viewer) = inner.viewer.as_ref() {
                return viewer
                    .view(viewport.width, viewport.height)
                    .lines()
                    .map(|l| l.to_string())
                    .collect();
            }
        }
        match self.snapshot() {
            Some(snapshot) => snapshot.lines.clone(),
            None => Vec::new(),
        }
    }

    fn render(&self, content: Option<Vec<String>>) -> String {
        let viewport = terminal_viewport(self.width, self.height, self.offset_x);
        let inner_width = viewport.width as usize;

        let mut lines = Vec::with_capacity(self.height as usize);
        lines.push(pad_to(&self.tab_bar_line(), self.width as usize));

        // Top border carries the scroll position when scrolled back.
        let scroll = self.active_scroll_info();
        let top_label = match scroll {
            Some((offset, total)) if offset > 0 => format!("[{}/{}]", offset, total),
            _ => String::new(),
        };
        lines.push(border_line('┌', '┐', inner_width, &top_label));

        let content = content.unwrap_or_default();
        for row in 0..viewport.height as usize {
            let body = content.get(row).map(String::as_str).unwrap_or("");
            lines.push(format!("│{}│", pad_to(body, inner_width)));
        }

        lines.push(border_line('└', '┘', inner_width, ""));
        lines.push(pad_to(
            "super+c copy  alt+←/→ tabs  pgup/pgdn scroll",
            self.width as usize,
        ));

        lines.join("\n")
    }

    fn tab_bar_line(&self) -> String {
        let ws = &self.workspace;
        let active = self.registry.active_index(ws);
        let mut parts = Vec::new();
        for (index, tab) in self.registry.tabs(ws).iter().enumerate() {
            if tab.closing || tab.closed {
                continue;
            }
            let marker = match tab.status() {
                TabStatus::Running => "",
                TabStatus::Detached => "~",
                TabStatus::Stopped => "!",
            };
            let focus = if index == active { "*" } else { " " };
            parts.push(format!("{}{}:{}{}", focus, index + 1, tab.title, marker));
        }
        if parts.is_empty() {
            format!(" {} (no tabs)", ws)
        } else {
            parts.join(" │")
        }
    }

    fn active_scroll_info(&self) -> Option<(usize, usize)> {
        let tab = self.registry.active_tab(&self.workspace)?;
        let shared = tab.shared.clone();
        let inner = shared.lock();
        inner.vt.as_ref().map(|vt| vt.scroll_info())
    }
}

fn pad_to(text: &str, width: usize) -> String {
    let mut out: String = text.chars().take(width).collect();
    let used = out.chars().count();
    out.extend(std::iter::repeat(' ').take(width.saturating_sub(used)));
    out
}

fn border_line(left: char, right: char, inner_width: usize, label: &str) -> String {
    let label: String = label.chars().take(inner_width).collect();
    let fill = inner_width.saturating_sub(label.chars().count());
    let mut out = String::with_capacity(inner_width + 2);
    out.push(left);
    out.push('─');
    out.push_str(&label);
    for _ in 0..fill.saturating_sub(1) {
        out.push('─');
    }
    out.push(right);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_geometry() {
        let vp = terminal_viewport(80, 24, 0);
        assert_eq!(vp, Viewport { x: 1, y: 2, width: 78, height: 20 });

        let vp = terminal_viewport(80, 24, 10);
        assert_eq!(vp.x, 11);
    }

    #[test]
    fn test_viewport_contains_and_to_local() {
        let vp = terminal_viewport(80, 24, 0);
        assert!(vp.contains(1, 2));
        assert!(vp.contains(78, 21));
        assert!(!vp.contains(0, 2));
        assert!(!vp.contains(79, 2));
        assert!(!vp.contains(1, 22));

        assert_eq!(vp.to_local(1, 2), (0, 0));
        assert_eq!(vp.to_local(0, 1), (-1, -1));
        assert_eq!(vp.to_local(11, 25), (10, 23));
    }

    #[test]
    fn test_viewport_minimums_on_tiny_panes() {
        let vp = terminal_viewport(1, 1, 0);
        assert_eq!(vp.width, 1);
        assert_eq!(vp.height, 1);
    }

    #[test]
    fn test_pad_to_truncates_and_fills() {
        assert_eq!(pad_to("abc", 5), "abc  ");
        assert_eq!(pad_to("abcdef", 3), "abc");
    }

    #[test]
    fn test_border_line_width() {
        let line = border_line('┌', '┐', 10, "");
        assert_eq!(line.chars().count(), 12);
        let labeled = border_line('┌', '┐', 10, "[2/40]");
        assert_eq!(labeled.chars().count(), 12);
        assert!(labeled.contains("[2/40]"));
    }
}
