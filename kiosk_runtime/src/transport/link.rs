//! The real `SerialLink`: one background task per peripheral owning a
//! line-oriented async stream, a single pending-request slot, and a shared
//! event sink. Modeled on the teacher's `CcTalkTokioTransport::run` loop,
//! generalized from a fixed-width binary ccTalk packet to this domain's
//! newline-delimited JSON frames.
//!
//! The stream type is generic over anything implementing
//! `AsyncRead + AsyncWrite`: a real deployment plugs in a serial-port crate's
//! stream type here; tests use an in-memory duplex pipe.

use async_trait::async_trait;
use kiosk_core::error::{HardwareError, SerialError, TimeoutError};
use kiosk_core::wire::{Command, ControllerKind, ErrorFrame, Event, Frame};
use kiosk_host::capability::{LinkError, LinkResult, SerialLink};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

/// A queued request: the command to send plus where to deliver the result.
pub struct LinkMessage {
    pub command: Command,
    pub respond_to: oneshot::Sender<LinkResult<serde_json::Value>>,
}

/// Handle callers use to talk to a running link task.
#[derive(Clone)]
pub struct TokioSerialLink {
    port: String,
    sender: mpsc::Sender<LinkMessage>,
}

#[async_trait]
impl SerialLink for TokioSerialLink {
    #[instrument(skip(self), fields(port = %self.port, command = command.name()))]
    async fn send(&self, command: Command, timeout: Duration) -> LinkResult<serde_json::Value> {
        let name = command.name();
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(LinkMessage { command, respond_to })
            .await
            .map_err(|_| {
                LinkError::Serial(SerialError {
                    port: self.port.clone(),
                    message: "link task is not running".to_string(),
                })
            })?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LinkError::Serial(SerialError {
                port: self.port.clone(),
                message: "link task dropped the response channel".to_string(),
            })),
            Err(_) => Err(LinkError::Timeout(TimeoutError {
                command: name.to_string(),
                elapsed: timeout,
            })),
        }
    }
}

/// Spawn the background task owning `stream` and return a handle plus its
/// `JoinHandle`. `event_tx` is the event sink shared across every link;
/// events are tagged by the caller-supplied `controller` label before being
/// forwarded.
pub fn spawn_link<S>(
    port: String,
    stream: S,
    controller: ControllerKind,
    event_tx: mpsc::Sender<(ControllerKind, Event)>,
) -> (TokioSerialLink, JoinHandle<()>)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel(32);
    let handle = TokioSerialLink {
        port: port.clone(),
        sender: tx,
    };
    let join = tokio::spawn(run(port, stream, rx, controller, event_tx));
    (handle, join)
}

async fn run<S>(
    port: String,
    stream: S,
    mut requests: mpsc::Receiver<LinkMessage>,
    controller: ControllerKind,
    event_tx: mpsc::Sender<(ControllerKind, Event)>,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();
    let mut pending: Option<oneshot::Sender<LinkResult<serde_json::Value>>> = None;

    loop {
        tokio::select! {
            maybe_request = requests.recv() => {
                match maybe_request {
                    Some(msg) => {
                        let mut line = match serde_json::to_string(&msg.command) {
                            Ok(s) => s,
                            Err(e) => {
                                let _ = msg.respond_to.send(Err(LinkError::Serial(SerialError {
                                    port: port.clone(),
                                    message: format!("failed to encode command: {e}"),
                                })));
                                continue;
                            }
                        };
                        line.push('\n');
                        if let Err(e) = write_half.write_all(line.as_bytes()).await {
                            let _ = msg.respond_to.send(Err(LinkError::Serial(SerialError {
                                port: port.clone(),
                                message: format!("write failed: {e}"),
                            })));
                            continue;
                        }
                        pending = Some(msg.respond_to);
                    }
                    None => {
                        warn!(%port, "link sender dropped, shutting down");
                        break;
                    }
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(text)) => handle_line(&text, &port, &mut pending, controller, &event_tx).await,
                    Ok(None) => {
                        warn!(%port, "serial stream reached EOF");
                        break;
                    }
                    Err(e) => {
                        warn!(%port, error = %e, "serial read error, continuing");
                    }
                }
            }
        }
    }
}

async fn handle_line(
    text: &str,
    port: &str,
    pending: &mut Option<oneshot::Sender<LinkResult<serde_json::Value>>>,
    controller: ControllerKind,
    event_tx: &mpsc::Sender<(ControllerKind, Event)>,
) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => {
            warn!(%port, line = trimmed, "discarding non-JSON line");
            return;
        }
    };
    match Frame::classify(value) {
        Some(Frame::Response(value)) => {
            let Some(tx) = pending.take() else {
                warn!(%port, "response frame with no pending request, dropping");
                return;
            };
            let _ = tx.send(parse_response(value, port));
        }
        Some(Frame::Event(event)) => {
            let _ = event_tx.send((controller, event)).await;
        }
        None => {
            warn!(%port, line = trimmed, "discarding unrecognized frame");
        }
    }
}

fn parse_response(value: serde_json::Value, port: &str) -> LinkResult<serde_json::Value> {
    let status = value.get("status").and_then(|s| s.as_str()).unwrap_or_default();
    if status == "ERROR" {
        match serde_json::from_value::<ErrorFrame>(value) {
            Ok(frame) => Err(LinkError::Hardware(HardwareError::new(frame.code, frame.dispensed))),
            Err(e) => Err(LinkError::Serial(SerialError {
                port: port.to_string(),
                message: format!("malformed error frame: {e}"),
            })),
        }
    } else {
        Ok(value)
    }
}
