use crate::bridge::HostEvent;
use crate::clock::SharedClock;
use crate::config::SyncConfig;
use crate::connection::{ConnectionEvent, ListenerError, NORMAL_CLOSURE};
use crate::error::SessionError;
use crate::session::{SessionSnapshot, SyncSession, TransportEvent};
use crate::ws_transport::WsTransport;
use mastrctrl_protocol::{SyncMessage, WireParameter};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const COMMAND_CAP: usize = 64;

#[derive(Debug)]
pub enum SessionCommand {
    Connect,
    Disconnect,
    Reconnect,
    SelectEndpoint {
        id: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    SetValue { id: String, value: f64 },
    SetColor { id: String, color: String },
    LoadParameters(Vec<WireParameter>),
    ClearParameters,
    RequestState,
    HostEvent(HostEvent),
    SendHardware(SyncMessage),
    SetLargeDisplay(bool),
    SetFadeDelay(Duration),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

/// Cloneable front door to a running session task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn send(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.tx.send(cmd).await.map_err(|_| SessionError::ActorGone)
    }

    pub async fn connect(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Connect).await
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Disconnect).await
    }

    pub async fn reconnect(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Reconnect).await
    }

    pub async fn select_endpoint(&self, id: &str) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::SelectEndpoint {
            id: id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::ActorGone)?
    }

    pub async fn set_value(&self, id: &str, value: f64) -> Result<(), SessionError> {
        self.send(SessionCommand::SetValue {
            id: id.to_string(),
            value,
        })
        .await
    }

    pub async fn set_color(&self, id: &str, color: &str) -> Result<(), SessionError> {
        self.send(SessionCommand::SetColor {
            id: id.to_string(),
            color: color.to_string(),
        })
        .await
    }

    pub async fn load_parameters(&self, parameters: Vec<WireParameter>) -> Result<(), SessionError> {
        self.send(SessionCommand::LoadParameters(parameters)).await
    }

    pub async fn clear_parameters(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::ClearParameters).await
    }

    pub async fn request_state(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::RequestState).await
    }

    pub async fn host_event(&self, event: HostEvent) -> Result<(), SessionError> {
        self.send(SessionCommand::HostEvent(event)).await
    }

    pub async fn send_hardware(&self, msg: SyncMessage) -> Result<(), SessionError> {
        self.send(SessionCommand::SendHardware(msg)).await
    }

    pub async fn set_large_display(&self, enabled: bool) -> Result<(), SessionError> {
        self.send(SessionCommand::SetLargeDisplay(enabled)).await
    }

    pub async fn set_fade_delay(&self, delay: Duration) -> Result<(), SessionError> {
        self.send(SessionCommand::SetFadeDelay(delay)).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot(reply)).await?;
        rx.await.map_err(|_| SessionError::ActorGone)
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Shutdown).await
    }
}

/// Starts the session task and its WebSocket IO task on the current runtime.
///
/// `events` receives every connection event; pass `None` to only log them.
pub fn spawn(
    config: SyncConfig,
    clock: SharedClock,
    events: Option<mpsc::UnboundedSender<ConnectionEvent>>,
) -> (SessionHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_CAP);
    let (io_tx, io_rx) = mpsc::unbounded_channel();
    let transport = WsTransport::spawn(io_tx, config.handshake_timeout);

    let mut session = SyncSession::new(&config, clock.clone(), Box::new(transport));
    if let Some(events) = events {
        session.connection_mut().add_listener(move |event| {
            events.send(event.clone()).map_err(|e| -> ListenerError { Box::new(e) })
        });
    }

    let join = tokio::spawn(run(session, clock, rx, io_rx));
    (SessionHandle { tx }, join)
}

async fn run(
    mut session: SyncSession,
    clock: SharedClock,
    mut rx: mpsc::Receiver<SessionCommand>,
    mut io_rx: mpsc::UnboundedReceiver<TransportEvent>,
) {
    loop {
        let sleep_for = session
            .next_deadline()
            .map(|due| Duration::from_millis(due.saturating_sub(clock.now_ms())));

        tokio::select! {
            cmd = rx.recv() => {
                let Some(cmd) = cmd else { break };
                if !handle_command(&mut session, cmd) {
                    break;
                }
            }
            event = io_rx.recv() => {
                let Some(event) = event else {
                    warn!("transport task ended");
                    break;
                };
                session.handle_transport_event(event);
            }
            _ = sleep_or_forever(sleep_for) => {}
        }

        session.poll(clock.now_ms());
    }

    session.shutdown();
    info!("session stopped");
}

/// Returns `false` when the session should stop.
fn handle_command(session: &mut SyncSession, cmd: SessionCommand) -> bool {
    match cmd {
        SessionCommand::Connect => session.connection_mut().connect(),
        SessionCommand::Disconnect => session.connection_mut().disconnect(NORMAL_CLOSURE),
        SessionCommand::Reconnect => session.connection_mut().reconnect(),
        SessionCommand::SelectEndpoint { id, reply } => {
            let result = session
                .connection_mut()
                .select_endpoint(&id)
                .map_err(SessionError::from);
            let _ = reply.send(result);
        }
        SessionCommand::SetValue { id, value } => {
            if !session.set_value(&id, value) {
                debug!(%id, "set_value changed nothing");
            }
        }
        SessionCommand::SetColor { id, color } => {
            if !session.set_color(&id, &color) {
                debug!(%id, "set_color changed nothing");
            }
        }
        SessionCommand::LoadParameters(parameters) => session.load_parameters(parameters),
        SessionCommand::ClearParameters => session.clear_parameters(),
        SessionCommand::RequestState => {
            session.request_state();
        }
        SessionCommand::HostEvent(event) => session.apply_host_event(event),
        SessionCommand::SendHardware(msg) => {
            session.send_hardware(msg);
        }
        SessionCommand::SetLargeDisplay(enabled) => session.set_large_display(enabled),
        SessionCommand::SetFadeDelay(delay) => session.set_fade_delay(delay),
        SessionCommand::Snapshot(reply) => {
            let _ = reply.send(session.snapshot());
        }
        SessionCommand::Shutdown => return false,
    }
    true
}

async fn sleep_or_forever(duration: Option<Duration>) {
    match duration {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}
