//! WebSocket transport backed by tokio-tungstenite.
//!
//! [`WsTransport`] is the synchronous handle the connection manager drives; the
//! socket itself lives in a spawned IO task that reports completions back as
//! [`TransportEvent`]s tagged with the attempt that produced them.
//!
//! A pending handshake never holds up the command queue. A later `open` or
//! `close` drops it, and it fails on its own after the handshake timeout.

use crate::connection::{Transport, ABNORMAL_CLOSURE};
use crate::error::TransportError;
use crate::session::TransportEvent;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Sent by peers that close without a status code.
const NO_STATUS_RECEIVED: u16 = 1005;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug)]
enum IoCommand {
    Open { url: Url, attempt: u64 },
    Send(String),
    Close(u16),
}

struct Handshake {
    attempt: u64,
    pending: BoxFuture<'static, Result<WsStream, String>>,
}

struct LiveSocket {
    attempt: u64,
    socket: WsStream,
}

pub struct WsTransport {
    tx: mpsc::UnboundedSender<IoCommand>,
    open: Arc<AtomicBool>,
}

impl WsTransport {
    /// Spawns the IO task on the current runtime.
    pub fn spawn(events: mpsc::UnboundedSender<TransportEvent>, handshake_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        tokio::spawn(io_loop(rx, events, Arc::clone(&open), handshake_timeout));
        Self { tx, open }
    }

    /// Whether the IO task currently holds an open socket.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn command(&self, cmd: IoCommand) -> Result<(), TransportError> {
        self.tx.send(cmd).map_err(|_| TransportError::Closed)
    }
}

impl Transport for WsTransport {
    fn open(&mut self, url: &Url, generation: u64) -> Result<(), TransportError> {
        self.command(IoCommand::Open {
            url: url.clone(),
            attempt: generation,
        })
    }

    fn send(&mut self, text: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.command(IoCommand::Send(text.to_string()))
    }

    fn close(&mut self, code: u16) {
        if self.command(IoCommand::Close(code)).is_err() {
            debug!(code, "io task already gone");
        }
    }
}

fn start_handshake(url: Url, attempt: u64, timeout: Duration) -> Handshake {
    let pending = async move {
        match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url.to_string())).await {
            Ok(Ok((socket, _))) => Ok(socket),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("handshake timed out after {} ms", timeout.as_millis())),
        }
    }
    .boxed();
    Handshake { attempt, pending }
}

async fn io_loop(
    mut rx: mpsc::UnboundedReceiver<IoCommand>,
    events: mpsc::UnboundedSender<TransportEvent>,
    open: Arc<AtomicBool>,
    handshake_timeout: Duration,
) {
    let mut handshake: Option<Handshake> = None;
    let mut live: Option<LiveSocket> = None;

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    IoCommand::Open { url, attempt } => {
                        if let Some(old) = handshake.take() {
                            debug!(attempt = old.attempt, "handshake superseded");
                        }
                        close_live(&mut live, &open, None).await;
                        handshake = Some(start_handshake(url, attempt, handshake_timeout));
                    }
                    IoCommand::Send(text) => {
                        let Some(current) = live.as_mut() else {
                            debug!("send with no open socket");
                            continue;
                        };
                        if let Err(e) = current.socket.send(Message::text(text)).await {
                            warn!(error = %e, "websocket send failed");
                            let attempt = current.attempt;
                            live = None;
                            open.store(false, Ordering::Release);
                            report(&events, TransportEvent::Closed { attempt, code: ABNORMAL_CLOSURE });
                        }
                    }
                    IoCommand::Close(code) => {
                        if let Some(old) = handshake.take() {
                            debug!(attempt = old.attempt, "handshake cancelled");
                        }
                        close_live(&mut live, &open, Some(code)).await;
                    }
                }
            }
            (attempt, result) = next_handshake(&mut handshake) => {
                handshake = None;
                match result {
                    Ok(socket) => {
                        live = Some(LiveSocket { attempt, socket });
                        open.store(true, Ordering::Release);
                        report(&events, TransportEvent::Opened { attempt });
                    }
                    Err(reason) => report(&events, TransportEvent::Failed { attempt, reason }),
                }
            }
            incoming = next_frame(&mut live) => {
                let Some(attempt) = live.as_ref().map(|l| l.attempt) else { continue };
                let code = match incoming {
                    Some(Ok(Message::Text(text))) => {
                        report(&events, TransportEvent::Frame { attempt, text: text.as_str().to_string() });
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        frame.map(|f| u16::from(f.code)).unwrap_or(NO_STATUS_RECEIVED)
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read failed");
                        ABNORMAL_CLOSURE
                    }
                    None => ABNORMAL_CLOSURE,
                };
                live = None;
                open.store(false, Ordering::Release);
                report(&events, TransportEvent::Closed { attempt, code });
            }
        }
    }

    drop(handshake);
    close_live(&mut live, &open, None).await;
}

async fn close_live(live: &mut Option<LiveSocket>, open: &AtomicBool, code: Option<u16>) {
    open.store(false, Ordering::Release);
    let Some(mut current) = live.take() else {
        return;
    };
    let frame = code.map(|code| CloseFrame {
        code: CloseCode::from(code),
        reason: "".into(),
    });
    match tokio::time::timeout(CLOSE_TIMEOUT, current.socket.close(frame)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(attempt = current.attempt, error = %e, "close handshake did not complete"),
        Err(_) => debug!(attempt = current.attempt, "close handshake timed out"),
    }
}

async fn next_handshake(handshake: &mut Option<Handshake>) -> (u64, Result<WsStream, String>) {
    match handshake {
        Some(h) => {
            let attempt = h.attempt;
            (attempt, h.pending.as_mut().await)
        }
        None => std::future::pending().await,
    }
}

async fn next_frame(live: &mut Option<LiveSocket>) -> Option<Result<Message, tungstenite::Error>> {
    match live {
        Some(current) => current.socket.next().await,
        None => std::future::pending().await,
    }
}

fn report(events: &mpsc::UnboundedSender<TransportEvent>, event: TransportEvent) {
    if events.send(event).is_err() {
        debug!("session gone, dropping transport event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_is_refused_until_a_socket_opens() {
        let (events, _rx) = mpsc::unbounded_channel();
        let mut transport = WsTransport::spawn(events, Duration::from_secs(1));
        assert!(!transport.is_open());
        assert!(matches!(transport.send("{}"), Err(TransportError::NotOpen)));
    }
}
