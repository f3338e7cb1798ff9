//! Opaque sub-view hosted by non-PTY tabs (diff viewers, file viewers).
//!
//! The pane core never inspects viewer state; it forwards input and asks for
//! rendered lines. Concrete viewers live in the host application.

use crossterm::event::KeyEvent;

use crate::messages::Message;

/// Input forwarded to a viewer tab.
#[derive(Debug, Clone)]
pub enum ViewerInput {
    Key(KeyEvent),
    /// Wheel delta in rows; positive scrolls toward older content.
    Wheel {
        delta: i32,
    },
}

/// A non-terminal tab body.
///
/// `update` may return a message for the UI loop (e.g. a toast or a close
/// request); the tab actor propagates it through the message sink.
pub trait Viewer: Send {
    /// Called once when the viewer is installed into a tab.
    fn init(&mut self) -> Option<Message> {
        None
    }

    /// Feed one input event; optionally emit a message back to the UI loop.
    fn update(&mut self, input: ViewerInput) -> Option<Message>;

    /// Render the viewer body at the given content size.
    fn view(&self, width: u16, height: u16) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingViewer {
        updates: usize,
    }

    impl Viewer for CountingViewer {
        fn update(&mut self, _input: ViewerInput) -> Option<Message> {
            self.updates += 1;
            None
        }

        fn view(&self, _width: u16, _height: u16) -> String {
            format!("updates: {}", self.updates)
        }
    }

    #[test]
    fn test_viewer_update_and_view() {
        let mut viewer = CountingViewer { updates: 0 };
        assert!(viewer.update(ViewerInput::Wheel { delta: 1 }).is_none());
        assert_eq!(viewer.view(80, 24), "updates: 1");
    }
}
