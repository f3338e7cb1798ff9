//! Input dispatch: keys, mouse, and bracketed paste for the active tab.
//!
//! A small reserved chord set drives the pane itself (tab switching, close,
//! scrolling, the copy chord, the escape hatch); everything else encodes to
//! bytes and goes to the PTY. Any key that produces input bytes clears the
//! selection first (the copy chord is the one exception) and snaps a
//! scrolled-back view to live output before forwarding.

use crossterm::event::{
    KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};

use crate::messages::TabEventKind;
use crate::model::CenterPane;
use crate::tabs::TabId;
use crate::viewer::ViewerInput;

/// Pane-level request the host must act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneAction {
    /// The escape hatch: move focus out of the center pane.
    Unfocus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    Ignored,
    Handled,
    Action(PaneAction),
}

struct ActiveTabContext {
    id: TabId,
    is_viewer: bool,
    is_scrolled: bool,
}

impl CenterPane {
    fn active_tab_context(&self) -> Option<ActiveTabContext> {
        let tab = self.registry.active_tab(&self.workspace)?;
        let id = tab.id;
        let shared = tab.shared.clone();
        let inner = shared.lock();
        Some(ActiveTabContext {
            id,
            is_viewer: inner.viewer.is_some(),
            is_scrolled: inner.vt.as_ref().map(|vt| vt.is_scrolled()).unwrap_or(false),
        })
    }

    pub fn handle_key(&mut self, event: KeyEvent) -> InputOutcome {
        // Copy chord: emit the selection, suppress forwarding and the
        // implicit selection clear.
        if event.modifiers.contains(KeyModifiers::SUPER)
            && matches!(event.code, KeyCode::Char('c'))
        {
            self.dispatch_to_active(TabEventKind::SelectionCopy);
            return InputOutcome::Handled;
        }

        // Reserved chords.
        if event.modifiers.contains(KeyModifiers::ALT) {
            match event.code {
                KeyCode::Right => {
                    self.next_tab();
                    return InputOutcome::Handled;
                }
                KeyCode::Left => {
                    self.prev_tab();
                    return InputOutcome::Handled;
                }
                _ => {}
            }
        }
        if event.modifiers.contains(KeyModifiers::SUPER)
            && matches!(event.code, KeyCode::Char('w'))
        {
            self.close_active();
            return InputOutcome::Handled;
        }
        if event.modifiers.contains(KeyModifiers::CONTROL)
            && matches!(event.code, KeyCode::Char('\\'))
        {
            return InputOutcome::Action(PaneAction::Unfocus);
        }

        let Some(ctx) = self.active_tab_context() else {
            return InputOutcome::Ignored;
        };

        if ctx.is_viewer {
            let ws = self.workspace.clone();
            self.dispatch_tab_event(
                &ws,
                ctx.id,
                TabEventKind::DiffInput {
                    input: ViewerInput::Key(event),
                },
            );
            return InputOutcome::Handled;
        }

        // Page scroll stays in the pane rather than reaching the terminal.
        match event.code {
            KeyCode::PageUp => {
                self.dispatch_to_active(TabEventKind::ScrollPage { sign: 1 });
                return InputOutcome::Handled;
            }
            KeyCode::PageDown => {
                self.dispatch_to_active(TabEventKind::ScrollPage { sign: -1 });
                return InputOutcome::Handled;
            }
            _ => {}
        }

        let bytes = key_event_to_bytes(&event);
        if bytes.is_empty() {
            return InputOutcome::Ignored;
        }

        if ctx.is_scrolled {
            self.dispatch_to_active(TabEventKind::ScrollToBottom);
        }
        self.dispatch_to_active(TabEventKind::SelectionClear { notify_copy: false });
        self.dispatch_to_active(TabEventKind::SendInput { bytes });
        let ws = self.workspace.clone();
        self.note_input_activity(&ws, ctx.id);
        InputOutcome::Handled
    }

    pub fn handle_mouse(&mut self, event: MouseEvent) -> InputOutcome {
        let Some(ctx) = self.active_tab_context() else {
            return InputOutcome::Ignored;
        };
        let viewport = self.terminal_viewport();
        let (x, y) = viewport.to_local(event.column, event.row);

        match event.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                let in_bounds = viewport.contains(event.column, event.row);
                self.dispatch_to_active(TabEventKind::SelectionStart {
                    x: x.max(0) as usize,
                    y_screen: y,
                    in_bounds,
                });
                InputOutcome::Handled
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                self.dispatch_to_active(TabEventKind::SelectionUpdate { x, y_screen: y });
                InputOutcome::Handled
            }
            MouseEventKind::Up(MouseButton::Left) => {
                self.dispatch_to_active(TabEventKind::SelectionFinish);
                InputOutcome::Handled
            }
            MouseEventKind::ScrollUp | MouseEventKind::ScrollDown => {
                let step = (viewport.height as i32 / 8).max(1);
                let delta = if matches!(event.kind, MouseEventKind::ScrollUp) {
                    step
                } else {
                    -step
                };
                if ctx.is_viewer {
                    let ws = self.workspace.clone();
                    self.dispatch_tab_event(
                        &ws,
                        ctx.id,
                        TabEventKind::DiffInput {
                            input: ViewerInput::Wheel { delta },
                        },
                    );
                } else {
                    self.dispatch_to_active(TabEventKind::ScrollBy { delta });
                }
                InputOutcome::Handled
            }
            _ => InputOutcome::Ignored,
        }
    }

    pub fn handle_paste(&mut self, text: String) -> InputOutcome {
        let Some(ctx) = self.active_tab_context() else {
            return InputOutcome::Ignored;
        };
        if ctx.is_viewer {
            return InputOutcome::Ignored;
        }
        if ctx.is_scrolled {
            self.dispatch_to_active(TabEventKind::ScrollToBottom);
        }
        self.dispatch_to_active(TabEventKind::SelectionClear { notify_copy: false });
        self.dispatch_to_active(TabEventKind::Paste { text });
        let ws = self.workspace.clone();
        self.note_input_activity(&ws, ctx.id);
        InputOutcome::Handled
    }
}

/// Encode a key event as the byte sequence a terminal would send.
pub fn key_event_to_bytes(event: &KeyEvent) -> Vec<u8> {
    let mut bytes = Vec::new();

    match event.code {
        KeyCode::Char(c) => {
            if event.modifiers.contains(KeyModifiers::CONTROL) {
                if c.is_ascii_lowercase() {
                    bytes.push((c as u8) - b'a' + 1);
                } else if c.is_ascii_uppercase() {
                    bytes.push((c as u8) - b'A' + 1);
                } else if c == ' ' {
                    bytes.push(0x00);
                }
            } else if event.modifiers.contains(KeyModifiers::ALT) {
                bytes.push(0x1b);
                let mut encoded = [0u8; 4];
                bytes.extend(c.encode_utf8(&mut encoded).as_bytes());
            } else {
                let mut encoded = [0u8; 4];
                bytes.extend(c.encode_utf8(&mut encoded).as_bytes());
            }
        }
        KeyCode::Enter => bytes.push(b'\r'),
        KeyCode::Tab => bytes.push(b'\t'),
        KeyCode::BackTab => bytes.extend(b"\x1b[Z"),
        KeyCode::Backspace => bytes.push(0x7f),
        KeyCode::Esc => bytes.push(0x1b),
        KeyCode::Up => bytes.extend(b"\x1b[A"),
        KeyCode::Down => bytes.extend(b"\x1b[B"),
        KeyCode::Right => bytes.extend(b"\x1b[C"),
        KeyCode::Left => bytes.extend(b"\x1b[D"),
        KeyCode::Home => bytes.extend(b"\x1b[H"),
        KeyCode::End => bytes.extend(b"\x1b[F"),
        KeyCode::Insert => bytes.extend(b"\x1b[2~"),
        KeyCode::Delete => bytes.extend(b"\x1b[3~"),
        KeyCode::F(n) => {
            let seq: &[u8] = match n {
                1 => b"\x1bOP",
                2 => b"\x1bOQ",
                3 => b"\x1bOR",
                4 => b"\x1bOS",
                5 => b"\x1b[15~",
                6 => b"\x1b[17~",
                7 => b"\x1b[18~",
                8 => b"\x1b[19~",
                9 => b"\x1b[20~",
                10 => b"\x1b[21~",
                11 => b"\x1b[23~",
                12 => b"\x1b[24~",
                _ => b"",
            };
            bytes.extend(seq);
        }
        _ => {}
    }

    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::backend::fake::FakeBackend;
    use crate::config::PaneConfig;
    use crate::messages::Message;
    use crate::tabs::Tab;
    use crate::term::vt::VtScreen;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn test_key_encoding_basics() {
        assert_eq!(
            key_event_to_bytes(&key(KeyCode::Char('a'), KeyModifiers::NONE)),
            b"a"
        );
        assert_eq!(
            key_event_to_bytes(&key(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            vec![0x03]
        );
        assert_eq!(
            key_event_to_bytes(&key(KeyCode::Char('x'), KeyModifiers::ALT)),
            b"\x1bx"
        );
        assert_eq!(
            key_event_to_bytes(&key(KeyCode::Enter, KeyModifiers::NONE)),
            b"\r"
        );
        assert_eq!(
            key_event_to_bytes(&key(KeyCode::Up, KeyModifiers::NONE)),
            b"\x1b[A"
        );
        assert_eq!(
            key_event_to_bytes(&key(KeyCode::F(5), KeyModifiers::NONE)),
            b"\x1b[15~"
        );
    }

    #[test]
    fn test_key_encoding_utf8() {
        assert_eq!(
            key_event_to_bytes(&key(KeyCode::Char('é'), KeyModifiers::NONE)),
            "é".as_bytes()
        );
    }

    fn pane_with_tab() -> (
        CenterPane,
        tokio::sync::mpsc::UnboundedReceiver<Message>,
        TabId,
    ) {
        let (mut pane, rx) = CenterPane::new_for_test(
            PaneConfig::default(),
            Arc::new(FakeBackend::new()),
            "ws".to_string(),
        );
        let id = TabId::next();
        let tab = Tab::new(id, "ws".to_string(), "claude", "s".to_string(), 0);
        {
            let mut inner = tab.shared.lock();
            let mut vt = VtScreen::new(78, 20);
            for i in 0..5 {
                vt.write(format!("row {} content\r\n", i).as_bytes());
            }
            inner.vt = Some(vt);
        }
        pane.registry.push_tab(tab);
        pane.registry.set_active_index("ws", 0, 0);
        (pane, rx, id)
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_mouse_drag_produces_selection() {
        let (mut pane, mut rx, _) = pane_with_tab();
        let vp = pane.terminal_viewport();

        let press = MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column: vp.x,
            row: vp.y,
            modifiers: KeyModifiers::NONE,
        };
        let drag = MouseEvent {
            kind: MouseEventKind::Drag(MouseButton::Left),
            column: vp.x + 12,
            row: vp.y,
            modifiers: KeyModifiers::NONE,
        };
        let release = MouseEvent {
            kind: MouseEventKind::Up(MouseButton::Left),
            column: vp.x + 12,
            row: vp.y,
            modifiers: KeyModifiers::NONE,
        };
        assert_eq!(pane.handle_mouse(press), InputOutcome::Handled);
        assert_eq!(pane.handle_mouse(drag), InputOutcome::Handled);
        assert_eq!(pane.handle_mouse(release), InputOutcome::Handled);

        let clipboard = drain(&mut rx)
            .into_iter()
            .find_map(|m| match m {
                Message::TabSelectionResult { clipboard, .. } => Some(clipboard),
                _ => None,
            })
            .expect("drag release must emit the selection");
        assert!(clipboard.contains("row 0 content"));
    }

    #[tokio::test]
    async fn test_copy_chord_emits_exactly_one_result_and_keeps_selection() {
        let (mut pane, mut rx, id) = pane_with_tab();

        // Build a selection first.
        let vp = pane.terminal_viewport();
        pane.handle_mouse(MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column: vp.x,
            row: vp.y,
            modifiers: KeyModifiers::NONE,
        });
        pane.handle_mouse(MouseEvent {
            kind: MouseEventKind::Drag(MouseButton::Left),
            column: vp.x + 5,
            row: vp.y,
            modifiers: KeyModifiers::NONE,
        });
        pane.handle_mouse(MouseEvent {
            kind: MouseEventKind::Up(MouseButton::Left),
            column: vp.x + 5,
            row: vp.y,
            modifiers: KeyModifiers::NONE,
        });
        drain(&mut rx);

        let outcome = pane.handle_key(key(KeyCode::Char('c'), KeyModifiers::SUPER));
        assert_eq!(outcome, InputOutcome::Handled);

        let msgs = drain(&mut rx);
        let results = msgs
            .iter()
            .filter(|m| matches!(m, Message::TabSelectionResult { .. }))
            .count();
        assert_eq!(results, 1, "exactly one clipboard result");

        // Selection still present: the chord suppressed the implicit clear.
        let tab = pane.registry.tab_by_id("ws", id).unwrap();
        assert!(tab.shared.lock().vt.as_ref().unwrap().has_selection());
    }

    #[tokio::test]
    async fn test_plain_key_clears_selection_before_forwarding() {
        let (mut pane, _rx, id) = pane_with_tab();

        {
            let tab = pane.registry.tab_by_id("ws", id).unwrap();
            let mut inner = tab.shared.lock();
            let line = inner.vt.as_ref().unwrap().screen_y_to_absolute_line(0);
            inner
                .vt
                .as_mut()
                .unwrap()
                .set_selection(0, line, 5, line, true, false);
        }

        pane.handle_key(key(KeyCode::Char('x'), KeyModifiers::NONE));

        let tab = pane.registry.tab_by_id("ws", id).unwrap();
        assert!(!tab.shared.lock().vt.as_ref().unwrap().has_selection());
    }

    #[tokio::test]
    async fn test_input_snaps_scrollback_to_live() {
        let (mut pane, _rx, id) = pane_with_tab();
        {
            let tab = pane.registry.tab_by_id("ws", id).unwrap();
            let mut inner = tab.shared.lock();
            let vt = inner.vt.as_mut().unwrap();
            for i in 0..40 {
                vt.write(format!("fill {}\r\n", i).as_bytes());
            }
            vt.scroll_view(5);
            assert!(vt.is_scrolled());
        }

        pane.handle_key(key(KeyCode::Char('x'), KeyModifiers::NONE));

        let tab = pane.registry.tab_by_id("ws", id).unwrap();
        assert!(!tab.shared.lock().vt.as_ref().unwrap().is_scrolled());
    }

    #[tokio::test]
    async fn test_escape_hatch_returns_action() {
        let (mut pane, _rx, _) = pane_with_tab();
        assert_eq!(
            pane.handle_key(key(KeyCode::Char('\\'), KeyModifiers::CONTROL)),
            InputOutcome::Action(PaneAction::Unfocus)
        );
    }

    #[tokio::test]
    async fn test_tab_cycling_chords() {
        let (mut pane, _rx, _) = pane_with_tab();
        let second = Tab::new(TabId::next(), "ws".to_string(), "claude", "s2".to_string(), 0);
        pane.registry.push_tab(second);

        assert_eq!(pane.registry.active_index("ws"), 0);
        pane.handle_key(key(KeyCode::Right, KeyModifiers::ALT));
        assert_eq!(pane.registry.active_index("ws"), 1);
        pane.handle_key(key(KeyCode::Left, KeyModifiers::ALT));
        assert_eq!(pane.registry.active_index("ws"), 0);
    }

    #[tokio::test]
    async fn test_page_keys_scroll_instead_of_forwarding() {
        let (mut pane, _rx, id) = pane_with_tab();
        {
            let tab = pane.registry.tab_by_id("ws", id).unwrap();
            let mut inner = tab.shared.lock();
            let vt = inner.vt.as_mut().unwrap();
            for i in 0..60 {
                vt.write(format!("fill {}\r\n", i).as_bytes());
            }
        }

        pane.handle_key(key(KeyCode::PageUp, KeyModifiers::NONE));
        let tab = pane.registry.tab_by_id("ws", id).unwrap();
        assert!(tab.shared.lock().vt.as_ref().unwrap().is_scrolled());
    }
}
