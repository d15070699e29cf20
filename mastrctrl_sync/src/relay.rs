//! Development relay: a blocking WebSocket server that forwards sync traffic
//! between every connected surface.
//!
//! The four sync kinds are forwarded verbatim to every client except the
//! sender. A legacy `parameter_update` is answered to its sender with an
//! `led_update` for that one ring. Everything else is logged and dropped.

use crate::clock::{Clock, SystemClock};
use crate::hardware::{active_led_index, fastled, LED_OFF};
use crate::registry::DEFAULT_LED_COUNT;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use mastrctrl_protocol::{LedStrip, MessageKind, Rgb, SyncMessage};
use serde_json::Value;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message;

pub const RELAY_EVENT_CAP: usize = 256;

/// Bounds a handshake thread, never the relay loop.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
/// Per-client read wait; bounds how long one idle client delays the others.
const READ_POLL: Duration = Duration::from_millis(10);

/// Ring color used in `led_update` replies.
const REPLY_COLOR: Rgb = Rgb::new(76, 175, 80);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    ClientConnected(SocketAddr),
    ClientDisconnected(SocketAddr),
    Relayed { kind: MessageKind, recipients: usize },
}

struct RelayClient {
    ws: tungstenite::WebSocket<TcpStream>,
    addr: SocketAddr,
}

pub struct RelayServer {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RelayServer {
    /// Binds `addr` (port 0 picks a free one) and starts the relay thread.
    pub fn spawn_with_addr(addr: &str) -> Result<(Self, Receiver<RelayEvent>), std::io::Error> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let (events_tx, events_rx) = bounded(RELAY_EVENT_CAP);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_for_thread = Arc::clone(&shutdown);
        let join_handle = thread::spawn(move || run_relay(listener, events_tx, shutdown_for_thread));

        info!(%addr, "relay listening");
        Ok((
            Self {
                addr,
                shutdown,
                join_handle: Mutex::new(Some(join_handle)),
            },
            events_rx,
        ))
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Ok(mut h) = self.join_handle.lock() {
            if let Some(h) = h.take() {
                let _ = h.join();
            }
        }
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_relay(listener: TcpListener, events: Sender<RelayEvent>, shutdown: Arc<AtomicBool>) {
    let mut clients: Vec<RelayClient> = Vec::new();
    let (joined_tx, joined_rx) = unbounded::<RelayClient>();

    while !shutdown.load(Ordering::Relaxed) {
        accept_pending(&listener, &joined_tx);
        for client in joined_rx.try_iter() {
            info!(addr = %client.addr, "relay client joined");
            let _ = events.try_send(RelayEvent::ClientConnected(client.addr));
            clients.push(client);
        }

        let mut inbound: Vec<(usize, String)> = Vec::new();
        let mut dead: Vec<usize> = Vec::new();
        for (i, client) in clients.iter_mut().enumerate() {
            match client.ws.read() {
                Ok(Message::Text(text)) => inbound.push((i, text.as_str().to_string())),
                Ok(Message::Ping(payload)) => {
                    let _ = client.ws.send(Message::Pong(payload));
                }
                Ok(Message::Close(_)) => dead.push(i),
                Ok(_) => {}
                Err(tungstenite::Error::Io(e))
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(_) => dead.push(i),
            }
        }

        for (from, text) in inbound {
            dead.extend(dispatch(&mut clients, from, &text, &events));
        }

        dead.sort_unstable();
        dead.dedup();
        for i in dead.into_iter().rev() {
            let mut client = clients.remove(i);
            let _ = client.ws.close(None);
            info!(addr = %client.addr, "relay client left");
            let _ = events.try_send(RelayEvent::ClientDisconnected(client.addr));
        }

        if clients.is_empty() {
            thread::sleep(Duration::from_millis(25));
        }
    }

    for mut client in clients {
        let _ = client.ws.close(None);
    }
}

/// Hands each new connection to its own handshake thread; finished clients
/// come back through `joined`.
fn accept_pending(listener: &TcpListener, joined: &Sender<RelayClient>) {
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                let joined = joined.clone();
                thread::spawn(move || handshake(stream, addr, &joined));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => {
                warn!(error = %e, "accept failed");
                break;
            }
        }
    }
}

fn handshake(stream: TcpStream, addr: SocketAddr, joined: &Sender<RelayClient>) {
    // Blocking handshake, then short read timeouts for the polling loop.
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_nodelay(true);
    let _ = stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(200)));
    match tungstenite::accept(stream) {
        Ok(ws) => {
            let _ = ws.get_ref().set_read_timeout(Some(READ_POLL));
            if joined.send(RelayClient { ws, addr }).is_err() {
                debug!(%addr, "relay stopped during handshake");
            }
        }
        Err(e) => warn!(%addr, error = %e, "websocket handshake failed"),
    }
}

/// Handles one frame from client `from`; returns indices of clients whose
/// socket failed while writing.
fn dispatch(
    clients: &mut [RelayClient],
    from: usize,
    text: &str,
    events: &Sender<RelayEvent>,
) -> Vec<usize> {
    let Some(kind) = frame_kind(text) else {
        debug!(len = text.len(), "relay ignoring frame without a known type");
        return Vec::new();
    };

    match kind {
        MessageKind::StructureSync
        | MessageKind::ValueSync
        | MessageKind::ColorSync
        | MessageKind::RequestState => {
            let mut dead = Vec::new();
            let mut recipients = 0;
            for (i, client) in clients.iter_mut().enumerate() {
                if i == from {
                    continue;
                }
                match client.ws.send(Message::text(text.to_string())) {
                    Ok(()) => recipients += 1,
                    Err(e) => {
                        warn!(addr = %client.addr, error = %e, "relay send failed");
                        dead.push(i);
                    }
                }
            }
            debug!(kind = kind.as_str(), recipients, "relayed");
            let _ = events.try_send(RelayEvent::Relayed { kind, recipients });
            dead
        }
        MessageKind::ParameterUpdate => {
            let Ok(SyncMessage::ParameterUpdate { parameter, value, .. }) =
                serde_json::from_str::<SyncMessage>(text)
            else {
                warn!("malformed parameter_update");
                return Vec::new();
            };
            let reply = led_reply(&parameter, value);
            let Some(client) = clients.get_mut(from) else {
                return Vec::new();
            };
            let sent = serde_json::to_string(&reply)
                .map_err(|e| e.to_string())
                .and_then(|json| client.ws.send(Message::text(json)).map_err(|e| e.to_string()));
            match sent {
                Ok(()) => {
                    let _ = events.try_send(RelayEvent::Relayed {
                        kind: MessageKind::LedUpdate,
                        recipients: 1,
                    });
                    Vec::new()
                }
                Err(e) => {
                    warn!(addr = %client.addr, error = %e, "led reply failed");
                    vec![from]
                }
            }
        }
        MessageKind::LedUpdate => {
            debug!("relay does not forward led_update");
            Vec::new()
        }
    }
}

fn frame_kind(text: &str) -> Option<MessageKind> {
    let value: Value = serde_json::from_str(text).ok()?;
    MessageKind::from_type(value.get("type")?.as_str()?)
}

fn led_reply(parameter: &str, value: f64) -> SyncMessage {
    let active = active_led_index(value, DEFAULT_LED_COUNT);
    let leds = (0..DEFAULT_LED_COUNT as usize)
        .map(|i| fastled(if i == active { REPLY_COLOR } else { LED_OFF }))
        .collect();
    SyncMessage::LedUpdate {
        data: vec![LedStrip {
            param_id: parameter.to_string(),
            leds,
        }],
        timestamp: SystemClock.now_ms(),
    }
}
