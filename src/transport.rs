// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Worker transport
//!
//! The `transport` module provides the framed, FIFO channel between a
//! parent process and a worker. Frames travel as JSON lines over the
//! worker's standard streams; the worker's stderr is drained into the
//! parent's log. The same framing runs over any byte stream pair, which is
//! how the protocol is exercised in tests without forking.
//!
//! The outbound side is a bounded queue, so senders experience
//! back-pressure when a worker stops reading.
//!

use crate::{frame::Frame, Error};

use futures::{SinkExt, StreamExt};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader},
    process::{Child, Command},
    select,
    sync::mpsc,
};
use tokio_util::{
    codec::{FramedRead, FramedWrite, LinesCodec},
    sync::CancellationToken,
};

use tracing::{debug, error, warn};

use std::{process::Stdio, sync::Mutex};

/// Depth of the bounded outbound queue.
const SEND_QUEUE_DEPTH: usize = 64;

/// Upper bound on a single frame line.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Debug flags recognized on the command line, both the legacy form and
/// the inspector family. Longer prefixes first.
const DEBUG_FLAGS: [&str; 3] = ["--debug-brk", "--inspect-brk", "--inspect"];

/// Port assumed when a debug flag carries none.
const DEFAULT_DEBUG_PORT: u16 = 9229;

/// Sending half of a transport. Cheap to clone.
#[derive(Clone)]
pub(crate) struct TransportHandle {
    outbound: mpsc::Sender<Frame>,
    closed: CancellationToken,
}

impl TransportHandle {
    /// Queues a frame for writing. Fails once the transport has closed.
    pub(crate) async fn send(&self, frame: Frame) -> Result<(), Error> {
        if self.closed.is_cancelled() {
            return Err(Error::TransportClosed);
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| Error::TransportClosed)
    }

    /// True once either direction has shut down.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Shuts the transport down.
    pub(crate) fn close(&self) {
        self.closed.cancel();
    }
}

/// Wires a byte stream pair into a framed transport. Returns the sending
/// handle and the stream of inbound frames. The inbound stream ends when
/// the peer goes away; a malformed frame closes the transport.
pub(crate) fn connect<R, W>(
    read: R,
    write: W,
) -> (TransportHandle, mpsc::Receiver<Frame>)
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let closed = CancellationToken::new();
    let (outbound_sender, mut outbound_receiver) =
        mpsc::channel::<Frame>(SEND_QUEUE_DEPTH);
    let (inbound_sender, inbound_receiver) =
        mpsc::channel::<Frame>(SEND_QUEUE_DEPTH);

    let writer_token = closed.clone();
    tokio::spawn(async move {
        let mut framed = FramedWrite::new(
            write,
            LinesCodec::new_with_max_length(MAX_FRAME_BYTES),
        );
        loop {
            select! {
                frame = outbound_receiver.recv() => {
                    let Some(frame) = frame else { break };
                    let line = match serde_json::to_string(&frame) {
                        Ok(line) => line,
                        Err(err) => {
                            error!("Failed to encode frame: {}", err);
                            continue;
                        }
                    };
                    if let Err(err) = framed.send(line).await {
                        error!("Failed to write frame: {}", err);
                        writer_token.cancel();
                        break;
                    }
                }
                _ = writer_token.cancelled() => break,
            }
        }
    });

    let reader_token = closed.clone();
    tokio::spawn(async move {
        let mut framed = FramedRead::new(
            read,
            LinesCodec::new_with_max_length(MAX_FRAME_BYTES),
        );
        loop {
            select! {
                line = framed.next() => {
                    match line {
                        Some(Ok(line)) => {
                            match serde_json::from_str::<Frame>(&line) {
                                Ok(frame) => {
                                    if inbound_sender.send(frame).await.is_err() {
                                        break;
                                    }
                                }
                                Err(err) => {
                                    error!(
                                        "Malformed frame on transport: {}",
                                        err
                                    );
                                    reader_token.cancel();
                                    break;
                                }
                            }
                        }
                        Some(Err(err)) => {
                            error!("Transport read failed: {}", err);
                            reader_token.cancel();
                            break;
                        }
                        None => {
                            debug!("Transport reached end of stream.");
                            reader_token.cancel();
                            break;
                        }
                    }
                }
                _ = reader_token.cancelled() => break,
            }
        }
    });

    (
        TransportHandle {
            outbound: outbound_sender,
            closed,
        },
        inbound_receiver,
    )
}

/// A forked worker process with its transport already wired up.
pub(crate) struct SpawnedWorker {
    pub(crate) transport: TransportHandle,
    pub(crate) inbound: mpsc::Receiver<Frame>,
    pub(crate) process: WorkerProcess,
}

/// Handle on the worker's OS process.
pub(crate) struct WorkerProcess {
    child: Mutex<Child>,
}

impl WorkerProcess {
    /// Kills the worker. Errors only mean it is already gone.
    pub(crate) fn kill(&self) {
        let mut child =
            self.child.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(err) = child.start_kill() {
            debug!("Worker process already gone: {}", err);
        }
    }
}

/// Forks a worker and wires its standard streams into a transport. The
/// worker's stderr is logged at warn level.
pub(crate) fn spawn_worker(
    command: &[String],
    extra_args: Vec<String>,
) -> Result<SpawnedWorker, Error> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| Error::Spawn("empty worker command".to_owned()))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .args(extra_args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        Error::Spawn(format!("failed to start worker '{}': {}", program, err))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::Spawn("worker stdin unavailable".to_owned()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Spawn("worker stdout unavailable".to_owned()))?;

    if let Some(stderr) = child.stderr.take() {
        let pid = child.id();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("Worker {:?} stderr: {}", pid, line);
            }
        });
    }

    let (transport, inbound) = connect(stdout, stdin);
    Ok(SpawnedWorker {
        transport,
        inbound,
        process: WorkerProcess {
            child: Mutex::new(child),
        },
    })
}

/// Selects the debug-related arguments of the current process and rewrites
/// their ports by `offset`, so concurrent children do not collide on one
/// inspector port.
pub(crate) fn forward_debug_args<I>(args: I, offset: u16) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    args.into_iter()
        .filter_map(|arg| rewrite_debug_arg(&arg, offset))
        .collect()
}

fn rewrite_debug_arg(arg: &str, offset: u16) -> Option<String> {
    for flag in DEBUG_FLAGS {
        let Some(rest) = arg.strip_prefix(flag) else {
            continue;
        };
        let base = match rest.strip_prefix('=') {
            Some(port) => port.parse::<u16>().unwrap_or(DEFAULT_DEBUG_PORT),
            None if rest.is_empty() => DEFAULT_DEBUG_PORT,
            None => continue,
        };
        return Some(format!("{}={}", flag, base.saturating_add(offset)));
    }
    None
}
