//! Per-tab PTY reader pipeline.
//!
//! Three cooperating pieces per attached tab:
//!
//! 1. a blocking **raw read loop** pulling up to 32 KiB per read off the PTY,
//! 2. a 60 Hz **frame loop** that accumulates chunks and releases them as
//!    `PtyOutput` messages on frame boundaries (or early past 512 KiB),
//! 3. a **forwarder** that coalesces adjacent `PtyOutput` messages for the
//!    same tab before they reach the update loop, absorbing burstiness.
//!
//! The raw loop talks to the frame loop over a bounded channel, so a slow
//! frame loop backpressures the PTY read instead of ballooning memory. All
//! three terminate when the cancellation token fires or the PTY dies, and
//! every exit path closes the downstream channel (dropping the sender), so
//! the forwarder can never stall on a dead reader.

pub mod trace;

use std::io::Read;
use std::sync::{OnceLock, Weak};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::messages::{Message, MsgSink};
use crate::reader::trace::TraceFile;
use crate::tabs::{ReaderHandle, TabId, TabShared, WorkspaceId};

/// Max bytes per PTY read.
pub const READ_BUF_SIZE: usize = 32 * 1024;
/// Raw-loop to frame-loop channel depth.
pub const DATA_CHANNEL_CAP: usize = 64;
/// Frame loop cadence.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);
/// Pending bytes that force an early frame flush, and the cap on a single
/// coalesced `PtyOutput`.
pub const OUTPUT_MESSAGE_CAP: usize = 512 * 1024;
/// A reader whose heartbeat is older than this is presumed wedged.
pub const HEARTBEAT_STALL: Duration = Duration::from_secs(10);

/// Monotonic nanoseconds since an arbitrary process epoch, for the
/// heartbeat atomics.
pub fn now_ns() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Everything a reader needs; the tab itself is only reachable through the
/// weak handle (for heartbeats) and `(ws, id)` message addressing.
pub struct ReaderSpawn {
    pub ws: WorkspaceId,
    pub id: TabId,
    pub seq: u64,
    pub pty_reader: Box<dyn Read + Send>,
    pub shared: Weak<TabShared>,
    pub sink: MsgSink,
    pub trace: Option<TraceFile>,
}

/// Spawn the reader pipeline for a tab. Must be called on a tokio runtime.
pub fn spawn_reader(spawn: ReaderSpawn) -> ReaderHandle {
    let ReaderSpawn {
        ws,
        id,
        seq,
        pty_reader,
        shared,
        sink,
        trace,
    } = spawn;

    let cancel = CancellationToken::new();

    let (data_tx, data_rx) = mpsc::channel::<Vec<u8>>(DATA_CHANNEL_CAP);
    let (err_tx, err_rx) = mpsc::channel::<std::io::Error>(1);
    let (fwd_tx, fwd_rx) = mpsc::channel::<Message>(DATA_CHANNEL_CAP);

    info!(event = "core.reader.start", ws = %ws, tab = %id, seq = seq);

    spawn_raw_loop(
        pty_reader,
        data_tx,
        err_tx,
        cancel.clone(),
        shared.clone(),
        trace,
    );
    spawn_frame_loop(
        ws.clone(),
        id,
        seq,
        data_rx,
        err_rx,
        fwd_tx,
        cancel.clone(),
        shared,
    );
    spawn_forwarder(fwd_rx, sink);

    ReaderHandle { cancel, seq }
}

/// Blocking read loop on a dedicated thread.
fn spawn_raw_loop(
    mut reader: Box<dyn Read + Send>,
    data_tx: mpsc::Sender<Vec<u8>>,
    err_tx: mpsc::Sender<std::io::Error>,
    cancel: CancellationToken,
    shared: Weak<TabShared>,
    mut trace: Option<TraceFile>,
) {
    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; READ_BUF_SIZE];
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!(event = "core.reader.raw_eof");
                    break;
                }
                Ok(n) => {
                    if let Some(shared) = shared.upgrade() {
                        shared.beat(now_ns());
                    }
                    if let Some(trace) = trace.as_mut() {
                        trace.record(&buf[..n]);
                    }
                    // blocking_send applies backpressure: a slow frame loop
                    // slows the PTY read instead of growing a queue.
                    if data_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(event = "core.reader.raw_error", error = %e);
                    let _ = err_tx.try_send(e);
                    break;
                }
            }
        }
        // data_tx drops here on every path, closing the frame loop's input.
    });
}

/// 60 Hz accumulator between the raw loop and the forwarder.
#[allow(clippy::too_many_arguments)]
fn spawn_frame_loop(
    ws: WorkspaceId,
    id: TabId,
    seq: u64,
    mut data_rx: mpsc::Receiver<Vec<u8>>,
    mut err_rx: mpsc::Receiver<std::io::Error>,
    fwd_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
    shared: Weak<TabShared>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(FRAME_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut pending: Vec<u8> = Vec::new();

        let flush =
            |pending: &mut Vec<u8>| -> Option<Message> {
                if pending.is_empty() {
                    return None;
                }
                Some(Message::PtyOutput {
                    ws: ws.clone(),
                    id,
                    bytes: std::mem::take(pending),
                })
            };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Some(msg) = flush(&mut pending) {
                        let _ = fwd_tx.send(msg).await;
                    }
                    debug!(event = "core.reader.frame_cancelled", ws = %ws, tab = %id);
                    return;
                }
                chunk = data_rx.recv() => {
                    match chunk {
                        Some(chunk) => {
                            pending.extend_from_slice(&chunk);
                            if pending.len() >= OUTPUT_MESSAGE_CAP {
                                if let Some(msg) = flush(&mut pending) {
                                    let _ = fwd_tx.send(msg).await;
                                }
                            }
                        }
                        None => {
                            // Raw loop is gone: flush residual bytes, then
                            // report why it stopped.
                            if let Some(msg) = flush(&mut pending) {
                                let _ = fwd_tx.send(msg).await;
                            }
                            let reason = err_rx.try_recv().ok().map(|e| e.to_string());
                            info!(
                                event = "core.reader.stopped",
                                ws = %ws,
                                tab = %id,
                                seq = seq,
                                reason = ?reason,
                            );
                            let _ = fwd_tx
                                .send(Message::PtyStopped { ws: ws.clone(), id, seq, reason })
                                .await;
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if let Some(shared) = shared.upgrade() {
                        shared.beat(now_ns());
                    }
                    if let Some(msg) = flush(&mut pending) {
                        let _ = fwd_tx.send(msg).await;
                    }
                }
            }
        }
    });
}

/// Coalesce adjacent `PtyOutput` messages for the same tab, bounded by
/// [`OUTPUT_MESSAGE_CAP`] per delivered message. Other messages pass through
/// unchanged, in order. Never blocks on the UI sink (the sink is unbounded).
pub(crate) fn spawn_forwarder(
    mut rx: mpsc::Receiver<Message>,
    sink: MsgSink,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let mut current = msg;
            loop {
                match current {
                    Message::PtyOutput { ws, id, mut bytes } => {
                        let mut interleaved = None;
                        while bytes.len() < OUTPUT_MESSAGE_CAP {
                            match rx.try_recv() {
                                Ok(Message::PtyOutput {
                                    ws: next_ws,
                                    id: next_id,
                                    bytes: more,
                                }) if next_ws == ws && next_id == id => {
                                    bytes.extend_from_slice(&more);
                                }
                                Ok(other) => {
                                    interleaved = Some(other);
                                    break;
                                }
                                Err(_) => break,
                            }
                        }
                        sink.send(Message::PtyOutput { ws, id, bytes });
                        match interleaved {
                            Some(next) => current = next,
                            None => break,
                        }
                    }
                    other => {
                        sink.send(other);
                        break;
                    }
                }
            }
        }
    })
}
