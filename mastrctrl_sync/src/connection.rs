//! Channel lifecycle: connect, exponential-backoff reconnect, explicit close,
//! endpoint switching and per-direction activity lights.
//!
//! The manager never performs IO itself. It drives a [`Transport`] and is told
//! about completions through [`ConnectionManager::handle_opened`] and
//! [`ConnectionManager::handle_closed`]. Timers are plain deadlines checked in
//! [`ConnectionManager::poll`].

use crate::clock::{Millis, SharedClock};
use crate::config::{as_millis, BackoffPolicy, EndpointList, ServerEndpoint, SyncConfig};
use crate::error::{ConfigError, TransportError};
use crate::timer::{earliest, ActivityIndicator, Deadline};
use mastrctrl_protocol::SyncMessage;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Close code that means "closed on purpose, do not reconnect".
pub const NORMAL_CLOSURE: u16 = 1000;
/// Reported when the channel dies without a close frame or the handshake fails.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// The one thing allowed to touch the wire.
pub trait Transport: Send {
    /// Starts a handshake, superseding any earlier one. Completion is reported
    /// back asynchronously, tagged with `generation`.
    fn open(&mut self, url: &Url, generation: u64) -> Result<(), TransportError>;
    fn send(&mut self, text: &str) -> Result<(), TransportError>;
    fn close(&mut self, code: u16);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connecting { url: String },
    Connected { url: String },
    Disconnected { code: u16 },
    RetryScheduled { attempt: u32, delay: Duration },
    RetriesExhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Activity {
    pub sending: bool,
    pub receiving: bool,
}

pub type ListenerError = Box<dyn Error + Send + Sync>;
pub type Listener = Box<dyn FnMut(&ConnectionEvent) -> Result<(), ListenerError> + Send>;

pub struct ConnectionManager {
    clock: SharedClock,
    transport: Box<dyn Transport>,
    endpoints: EndpointList,
    backoff: BackoffPolicy,
    settle_delay: Millis,
    state: ConnectionState,
    /// Bumped by every connect and explicit disconnect. Transport completions
    /// carrying an older value belong to a superseded attempt.
    generation: u64,
    attempts: u32,
    exhausted: bool,
    retry: Deadline,
    settle: Deadline,
    outgoing: ActivityIndicator,
    incoming: ActivityIndicator,
    listeners: Vec<Listener>,
}

impl ConnectionManager {
    pub fn new(clock: SharedClock, transport: Box<dyn Transport>, config: &SyncConfig) -> Self {
        let hold = as_millis(config.activity_hold);
        Self {
            clock,
            transport,
            endpoints: config.endpoints.clone(),
            backoff: config.backoff,
            settle_delay: as_millis(config.settle_delay),
            state: ConnectionState::Disconnected,
            generation: 0,
            attempts: 0,
            exhausted: false,
            retry: Deadline::default(),
            settle: Deadline::default(),
            outgoing: ActivityIndicator::new(hold),
            incoming: ActivityIndicator::new(hold),
            listeners: Vec::new(),
        }
    }

    pub fn add_listener(
        &mut self,
        listener: impl FnMut(&ConnectionEvent) -> Result<(), ListenerError> + Send + 'static,
    ) {
        self.listeners.push(Box::new(listener));
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn status_label(&self) -> &'static str {
        match self.state {
            ConnectionState::Connected => "Connected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Disconnected => "Disconnected",
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Automatic retries gave up; only [`ConnectionManager::reconnect`] restarts.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn activity(&self) -> Activity {
        Activity {
            sending: self.outgoing.is_lit(),
            receiving: self.incoming.is_lit(),
        }
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        self.endpoints.current()
    }

    pub fn endpoints(&self) -> &EndpointList {
        &self.endpoints
    }

    /// No-op unless Disconnected.
    pub fn connect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            debug!(state = self.status_label(), "connect ignored, attempt already in flight");
            return;
        }
        self.retry.cancel();
        self.settle.cancel();

        let url = self.endpoints.current().url.clone();
        self.state = ConnectionState::Connecting;
        self.generation += 1;
        info!(url = %url, attempt = self.attempts, generation = self.generation, "connecting");
        self.emit(ConnectionEvent::Connecting {
            url: url.to_string(),
        });

        if let Err(e) = self.transport.open(&url, self.generation) {
            warn!(url = %url, error = %e, "could not start connection");
            self.handle_closed(ABNORMAL_CLOSURE);
        }
    }

    pub fn handle_opened(&mut self) {
        if self.state != ConnectionState::Connecting {
            debug!(state = self.status_label(), "open completion ignored");
            return;
        }
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        self.exhausted = false;
        let url = self.endpoints.current().url.to_string();
        info!(url = %url, "connected");
        self.emit(ConnectionEvent::Connected { url });
    }

    /// The channel closed or the handshake failed. Ignored after an explicit
    /// disconnect.
    pub fn handle_closed(&mut self, code: u16) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.state = ConnectionState::Disconnected;
        self.outgoing.clear();
        self.incoming.clear();
        info!(code, "disconnected");
        self.emit(ConnectionEvent::Disconnected { code });
        if code != NORMAL_CLOSURE {
            self.schedule_reconnect();
        }
    }

    pub fn disconnect(&mut self, code: u16) {
        self.retry.cancel();
        self.settle.cancel();
        self.attempts = 0;
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.transport.close(code);
        self.generation += 1;
        self.state = ConnectionState::Disconnected;
        self.outgoing.clear();
        self.incoming.clear();
        info!(code, "disconnected on request");
        self.emit(ConnectionEvent::Disconnected { code });
    }

    /// Disconnect, settle briefly, connect again. Clears the exhausted state.
    pub fn reconnect(&mut self) {
        self.disconnect(NORMAL_CLOSURE);
        self.exhausted = false;
        self.settle.arm(self.clock.now_ms(), self.settle_delay);
    }

    /// Switching to a different endpoint forces a reconnect; reselecting the
    /// current one does nothing.
    pub fn select_endpoint(&mut self, id: &str) -> Result<(), ConfigError> {
        if self.endpoints.select(id)? {
            info!(endpoint = id, url = %self.endpoints.current().url, "endpoint changed");
            self.reconnect();
        }
        Ok(())
    }

    pub fn send(&mut self, msg: &SyncMessage) -> bool {
        if self.state != ConnectionState::Connected {
            debug!(kind = msg.kind().as_str(), "not connected, message dropped");
            return false;
        }
        let text = match serde_json::to_string(msg) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "could not encode outbound message");
                return false;
            }
        };
        match self.transport.send(&text) {
            Ok(()) => {
                self.outgoing.flash(self.clock.now_ms());
                true
            }
            Err(e) => {
                warn!(kind = msg.kind().as_str(), error = %e, "send failed");
                false
            }
        }
    }

    pub fn note_received(&mut self) {
        self.incoming.flash(self.clock.now_ms());
    }

    pub fn poll(&mut self, now: Millis) {
        self.outgoing.poll(now);
        self.incoming.poll(now);
        if self.settle.fire(now).is_some() {
            self.connect();
        }
        if self.retry.fire(now).is_some() {
            debug!(attempt = self.attempts, "retry timer fired");
            self.connect();
        }
    }

    pub fn next_deadline(&self) -> Option<Millis> {
        earliest([
            self.retry.due(),
            self.settle.due(),
            self.outgoing.next_deadline(),
            self.incoming.next_deadline(),
        ])
    }

    /// Cancels every timer and closes the channel normally.
    pub fn shutdown(&mut self) {
        self.disconnect(NORMAL_CLOSURE);
        self.outgoing.clear();
        self.incoming.clear();
    }

    fn schedule_reconnect(&mut self) {
        if self.attempts >= self.backoff.max_attempts {
            self.exhausted = true;
            warn!(attempts = self.attempts, "giving up, manual reconnect required");
            self.emit(ConnectionEvent::RetriesExhausted {
                attempts: self.attempts,
            });
            return;
        }
        self.attempts += 1;
        let delay = self.backoff.delay_for(self.attempts);
        self.retry.arm(self.clock.now_ms(), as_millis(delay));
        info!(attempt = self.attempts, delay_ms = as_millis(delay), "reconnect scheduled");
        self.emit(ConnectionEvent::RetryScheduled {
            attempt: self.attempts,
            delay,
        });
    }

    fn emit(&mut self, event: ConnectionEvent) {
        for (i, listener) in self.listeners.iter_mut().enumerate() {
            if let Err(e) = listener(&event) {
                warn!(listener = i, error = %e, "connection listener failed");
            }
        }
    }
}
