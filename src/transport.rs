use futures::{SinkExt, StreamExt};
use std::io::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};

use crate::lifecycle::{Generation, GenerationEvent, TaggedEvent};
use crate::target::ShellAddress;

/// Close code for an intentional, clean shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Reported when the peer closes without a status code.
pub const NO_STATUS_RECEIVED: u16 = 1005;
/// Reported when the stream ends without any close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

const CLOSE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TransportEvent {
    Open,
    Message(Vec<u8>),
    Error(String),
    Close { code: u16, reason: Option<String> },
}

/// One duplex byte channel to the remote shell.
pub trait Transport {
    /// Sends raw bytes. Dropped with a warning when the channel is not open.
    fn send(&mut self, bytes: &[u8]);
    /// Closes the channel. Safe to call on an already closed channel.
    fn close(&mut self, code: u16);
    fn is_open(&self) -> bool;
}

#[derive(Debug)]
enum Outbound {
    Data(Vec<u8>),
    Close(u16),
}

/// WebSocket transport. The socket lives in its own task, which reports
/// through the session event channel tagged with its generation.
pub struct WsTransport {
    generation: Generation,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    ready: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl WsTransport {
    pub fn open(
        address: &ShellAddress,
        generation: Generation,
        events: mpsc::UnboundedSender<TaggedEvent>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let ready = Arc::new(AtomicBool::new(false));
        info!(generation, address = %address, "opening shell transport");
        let task = tokio::spawn(socket_loop(
            address.as_str().to_string(),
            EventSink { generation, events },
            outbound_rx,
            Arc::clone(&ready),
        ));
        Self {
            generation,
            outbound: Some(outbound_tx),
            ready,
            task,
        }
    }
}

impl Transport for WsTransport {
    fn send(&mut self, bytes: &[u8]) {
        if !self.is_open() {
            warn!(
                generation = self.generation,
                bytes = bytes.len(),
                "transport not open, dropping input"
            );
            return;
        }
        if let Some(outbound) = &self.outbound
            && outbound.send(Outbound::Data(bytes.to_vec())).is_err()
        {
            warn!(generation = self.generation, "transport task gone, dropping input");
        }
    }

    fn close(&mut self, code: u16) {
        self.ready.store(false, Ordering::SeqCst);
        if let Some(outbound) = self.outbound.take() {
            debug!(generation = self.generation, code, "closing shell transport");
            let _ = outbound.send(Outbound::Close(code));
        }
    }

    fn is_open(&self) -> bool {
        self.outbound.is_some() && self.ready.load(Ordering::SeqCst) && !self.task.is_finished()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close(NORMAL_CLOSURE);
    }
}

struct EventSink {
    generation: Generation,
    events: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSink {
    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(TaggedEvent {
            generation: self.generation,
            event: GenerationEvent::Transport(event),
        });
    }
}

async fn socket_loop(
    address: String,
    sink: EventSink,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    ready: Arc<AtomicBool>,
) {
    let connected = tokio::select! {
        result = tokio_tungstenite::connect_async(address.as_str()) => result,
        _ = wait_for_close(&mut outbound) => {
            debug!(generation = sink.generation, "transport closed before connect finished");
            return;
        }
    };

    let ws_stream = match connected {
        Ok((ws_stream, _)) => ws_stream,
        Err(error) => {
            debug!(generation = sink.generation, error = %error, "shell connect failed");
            sink.emit(TransportEvent::Error(error.to_string()));
            return;
        }
    };

    ready.store(true, Ordering::SeqCst);
    sink.emit(TransportEvent::Open);

    let (mut writer, mut reader) = ws_stream.split();
    loop {
        tokio::select! {
            frame = reader.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        sink.emit(TransportEvent::Message(text.as_str().as_bytes().to_vec()));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        sink.emit(TransportEvent::Message(data.to_vec()));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if writer.send(Message::Pong(data)).await.is_err() {
                            ready.store(false, Ordering::SeqCst);
                            sink.emit(TransportEvent::Error("failed to answer ping".to_string()));
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        ready.store(false, Ordering::SeqCst);
                        let (code, reason) = close_details(frame);
                        sink.emit(TransportEvent::Close { code, reason });
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) if is_dropped_connection(&error) => {
                        ready.store(false, Ordering::SeqCst);
                        debug!(
                            generation = sink.generation,
                            error = %error,
                            "shell connection dropped"
                        );
                        sink.emit(TransportEvent::Close {
                            code: ABNORMAL_CLOSURE,
                            reason: Some("connection dropped".to_string()),
                        });
                        break;
                    }
                    Some(Err(error)) => {
                        ready.store(false, Ordering::SeqCst);
                        sink.emit(TransportEvent::Error(error.to_string()));
                        break;
                    }
                    None => {
                        ready.store(false, Ordering::SeqCst);
                        sink.emit(TransportEvent::Close {
                            code: ABNORMAL_CLOSURE,
                            reason: Some("connection dropped".to_string()),
                        });
                        break;
                    }
                }
            }
            command = outbound.recv() => {
                match command {
                    Some(Outbound::Data(bytes)) => {
                        if writer.send(outbound_frame(bytes)).await.is_err() {
                            ready.store(false, Ordering::SeqCst);
                            sink.emit(TransportEvent::Error(
                                "failed to write to shell".to_string(),
                            ));
                            break;
                        }
                    }
                    Some(Outbound::Close(code)) => {
                        send_close(&mut writer, code).await;
                        break;
                    }
                    None => {
                        send_close(&mut writer, NORMAL_CLOSURE).await;
                        break;
                    }
                }
            }
        }
    }
    ready.store(false, Ordering::SeqCst);
}

async fn wait_for_close(outbound: &mut mpsc::UnboundedReceiver<Outbound>) {
    loop {
        match outbound.recv().await {
            Some(Outbound::Close(_)) | None => return,
            Some(Outbound::Data(_)) => {}
        }
    }
}

async fn send_close<S>(writer: &mut S, code: u16)
where
    S: futures::Sink<Message> + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: "".into(),
    };
    let _ = timeout(CLOSE_GRACE, writer.send(Message::Close(Some(frame)))).await;
}

/// Errors that mean the peer went away without a closing handshake.
fn is_dropped_connection(error: &WsError) -> bool {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => true,
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        WsError::Io(io) => matches!(
            io.kind(),
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::UnexpectedEof
        ),
        _ => false,
    }
}

fn outbound_frame(bytes: Vec<u8>) -> Message {
    match String::from_utf8(bytes) {
        Ok(text) => Message::text(text),
        Err(error) => Message::binary(error.into_bytes()),
    }
}

fn close_details(frame: Option<CloseFrame>) -> (u16, Option<String>) {
    match frame {
        Some(frame) => {
            let reason = frame.reason.as_str().trim().to_string();
            (
                u16::from(frame.code),
                (!reason.is_empty()).then_some(reason),
            )
        }
        None => (NO_STATUS_RECEIVED, None),
    }
}
