//! Host event loop: raw-mode terminal in, pane frames out.

use std::io::Write;
use std::sync::Arc;

use crossterm::event::{
    DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste, EnableMouseCapture, Event,
};
use crossterm::{cursor, execute, terminal};
use tokio::sync::mpsc;
use tracing::{info, warn};

use muxpane_core::input::{InputOutcome, PaneAction};
use muxpane_core::{CenterPane, Message, MsgSink, PaneConfig, TmuxBackend};

const FRAME: std::time::Duration = std::time::Duration::from_millis(16);

pub async fn run(
    config: PaneConfig,
    workspace: String,
    assistant: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let (sink, mut messages) = MsgSink::channel();
    let mut pane = CenterPane::new(config, Arc::new(TmuxBackend::new()), sink, workspace);

    let mut stdout = std::io::stdout();
    terminal::enable_raw_mode()?;
    execute!(
        stdout,
        terminal::EnterAlternateScreen,
        EnableMouseCapture,
        EnableBracketedPaste,
        cursor::Hide,
    )?;

    let result = event_loop(&mut pane, &mut messages, &mut stdout, &assistant).await;

    let ws = pane.workspace().to_string();
    if let Err(e) = muxpane_core::persist::save_to_disk(&pane, &ws) {
        warn!(event = "host.snapshot_save_failed", error = %e);
    }
    pane.shutdown();
    execute!(
        stdout,
        cursor::Show,
        DisableBracketedPaste,
        DisableMouseCapture,
        terminal::LeaveAlternateScreen,
    )?;
    terminal::disable_raw_mode()?;
    result
}

async fn event_loop(
    pane: &mut CenterPane,
    messages: &mut mpsc::UnboundedReceiver<Message>,
    stdout: &mut std::io::Stdout,
    assistant: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let (cols, rows) = terminal::size()?;
    pane.resize(cols, rows, 0);

    // Reopen the workspace where it was left; otherwise start one tab.
    let ws = pane.workspace().to_string();
    match muxpane_core::persist::load_from_disk(&pane.config().state_dir, &ws) {
        Ok(Some(snapshot)) if !snapshot.open_tabs.is_empty() => {
            muxpane_core::persist::restore_workspace(pane, &ws, &snapshot);
        }
        Ok(_) => pane.create_tab(assistant),
        Err(e) => {
            warn!(event = "host.snapshot_load_failed", error = %e);
            pane.create_tab(assistant);
        }
    }

    // Blocking crossterm reads live on their own thread; the loop below
    // stays async.
    let (input_tx, mut input_rx) = mpsc::channel::<Event>(64);
    std::thread::spawn(move || {
        loop {
            match crossterm::event::read() {
                Ok(event) => {
                    if input_tx.blocking_send(event).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(event = "host.input_read_failed", error = %e);
                    break;
                }
            }
        }
    });

    let mut ticker = tokio::time::interval(FRAME);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_frame = String::new();
    let mut status_line: Option<String> = None;

    loop {
        tokio::select! {
            maybe_msg = messages.recv() => {
                let Some(msg) = maybe_msg else { break };
                if let Some(host_msg) = pane.update(msg) {
                    match host_msg {
                        Message::Toast { level, text } => {
                            info!(event = "host.toast", level = ?level, text = %text);
                            status_line = Some(text);
                        }
                        Message::TabSelectionResult { clipboard, .. } => {
                            use base64::Engine;
                            // OSC 52 hands the selection to the outer terminal.
                            let encoded = base64::engine::general_purpose::STANDARD
                                .encode(clipboard.as_bytes());
                            let _ = write!(stdout, "\x1b]52;c;{}\x07", encoded);
                            let _ = stdout.flush();
                        }
                        Message::TabInputFailed { error, .. } => {
                            status_line = Some(format!("input failed: {}", error));
                        }
                        _ => {}
                    }
                }
            }
            maybe_event = input_rx.recv() => {
                let Some(event) = maybe_event else { break };
                match event {
                    Event::Key(key) => {
                        if let InputOutcome::Action(PaneAction::Unfocus) = pane.handle_key(key) {
                            break;
                        }
                    }
                    Event::Mouse(mouse) => {
                        pane.handle_mouse(mouse);
                    }
                    Event::Paste(text) => {
                        pane.handle_paste(text);
                    }
                    Event::Resize(cols, rows) => {
                        pane.resize(cols, rows, 0);
                        last_frame.clear();
                    }
                    _ => {}
                }
            }
            _ = ticker.tick() => {
                pane.on_frame();
                let mut frame = pane.view();
                if let Some(status) = &status_line {
                    frame.push_str("\r\n");
                    frame.push_str(status);
                }
                if frame != last_frame {
                    execute!(stdout, cursor::MoveTo(0, 0), terminal::Clear(terminal::ClearType::All))?;
                    write!(stdout, "{}", frame.replace('\n', "\r\n"))?;
                    stdout.flush()?;
                    last_frame = frame;
                }
            }
        }
    }

    Ok(())
}
