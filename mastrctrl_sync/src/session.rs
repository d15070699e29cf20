use crate::bridge::{HostBridge, HostEvent};
use crate::clock::{Millis, SharedClock};
use crate::config::SyncConfig;
use crate::connection::{Activity, ConnectionManager, ConnectionState, Transport, ABNORMAL_CLOSURE};
use crate::display::{DisplayArbiter, DisplayState};
use crate::registry::{Origin, ParameterDescriptor, ParameterRegistry};
use crate::router::{HistoryEntry, MessageRouter, DEFAULT_HISTORY_LIMIT};
use crate::timer::earliest;
use mastrctrl_protocol::{SyncMessage, WireParameter};
use std::time::Duration;
use tracing::{debug, warn};

/// Completions reported by whatever performs the socket IO. `attempt` is the
/// generation passed to [`Transport::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened { attempt: u64 },
    Frame { attempt: u64, text: String },
    Closed { attempt: u64, code: u16 },
    /// Handshake failed or timed out before the channel opened.
    Failed { attempt: u64, reason: String },
}

impl TransportEvent {
    pub fn attempt(&self) -> u64 {
        match self {
            Self::Opened { attempt }
            | Self::Frame { attempt, .. }
            | Self::Closed { attempt, .. }
            | Self::Failed { attempt, .. } => *attempt,
        }
    }
}

/// Point-in-time view for status lines and tests.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub status: &'static str,
    pub endpoint: String,
    pub attempts: u32,
    pub exhausted: bool,
    pub activity: Activity,
    pub structure_hash: Option<String>,
    pub parameters: Vec<ParameterDescriptor>,
    pub display: Option<DisplayState>,
    pub history: Vec<HistoryEntry>,
}

/// One of each component, wired together. Owned by a single task.
pub struct SyncSession {
    clock: SharedClock,
    connection: ConnectionManager,
    router: MessageRouter<ParameterRegistry>,
    registry: ParameterRegistry,
    display: DisplayArbiter,
    bridge: HostBridge,
    request_state_on_connect: bool,
}

impl SyncSession {
    pub fn new(config: &SyncConfig, clock: SharedClock, transport: Box<dyn Transport>) -> Self {
        let mut router = MessageRouter::new(clock.clone(), config.history_capacity);
        ParameterRegistry::register_handlers(&mut router);
        Self {
            connection: ConnectionManager::new(clock.clone(), transport, config),
            registry: ParameterRegistry::new(clock.clone()),
            display: DisplayArbiter::new(config.quiet_period, config.fade_delay, config.large_display),
            bridge: HostBridge::new(),
            request_state_on_connect: config.request_state_on_connect,
            router,
            clock,
        }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut ConnectionManager {
        &mut self.connection
    }

    pub fn registry(&self) -> &ParameterRegistry {
        &self.registry
    }

    pub fn router(&self) -> &MessageRouter<ParameterRegistry> {
        &self.router
    }

    pub fn display(&self) -> &DisplayArbiter {
        &self.display
    }

    /// Events from a superseded attempt are dropped.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        let current = self.connection.generation();
        if event.attempt() != current {
            debug!(attempt = event.attempt(), current, "dropping event from a superseded attempt");
            return;
        }
        match event {
            TransportEvent::Opened { .. } => {
                self.connection.handle_opened();
                if self.connection.is_connected() && self.request_state_on_connect {
                    self.request_state();
                }
            }
            TransportEvent::Frame { text, .. } => self.on_frame(&text),
            TransportEvent::Closed { code, .. } => self.connection.handle_closed(code),
            TransportEvent::Failed { reason, .. } => {
                warn!(%reason, "handshake failed");
                self.connection.handle_closed(ABNORMAL_CLOSURE);
            }
        }
    }

    pub fn on_frame(&mut self, raw: &str) {
        self.connection.note_received();
        if let Some(routed) = self.router.on_message(&mut self.registry, raw) {
            debug!(?routed, "inbound frame");
        }
        self.flush();
    }

    pub fn set_value(&mut self, id: &str, value: f64) -> bool {
        let changed = self.registry.set_value(id, value, Origin::Local);
        self.flush();
        changed
    }

    pub fn set_color(&mut self, id: &str, color: &str) -> bool {
        let changed = self.registry.set_color(id, color, Origin::Local);
        self.flush();
        changed
    }

    pub fn load_parameters(&mut self, parameters: Vec<WireParameter>) {
        self.registry.load_parameters(parameters);
        self.flush();
    }

    pub fn clear_parameters(&mut self) {
        self.registry.clear_parameters();
        self.flush();
    }

    pub fn apply_host_event(&mut self, event: HostEvent) {
        self.bridge.apply(event, &mut self.registry);
        self.flush();
    }

    pub fn request_state(&mut self) -> bool {
        let msg = SyncMessage::RequestParameterState {
            timestamp: self.clock.now_ms(),
        };
        self.send(msg)
    }

    /// Sends a hardware command (`parameter_update` / `led_update`).
    pub fn send_hardware(&mut self, msg: SyncMessage) -> bool {
        self.send(msg)
    }

    pub fn set_large_display(&mut self, enabled: bool) {
        self.display.set_enabled(enabled);
    }

    pub fn set_fade_delay(&mut self, delay: Duration) {
        self.display.set_fade_delay(delay);
    }

    pub fn poll(&mut self, now: Millis) {
        self.connection.poll(now);
        self.display.poll(now);
    }

    pub fn next_deadline(&self) -> Option<Millis> {
        earliest([self.connection.next_deadline(), self.display.next_deadline()])
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.connection.state(),
            status: self.connection.status_label(),
            endpoint: self.connection.endpoint().id.clone(),
            attempts: self.connection.attempts(),
            exhausted: self.connection.is_exhausted(),
            activity: self.connection.activity(),
            structure_hash: self.registry.structure_hash().map(str::to_string),
            parameters: self.registry.parameters().to_vec(),
            display: self.display.current().cloned(),
            history: self.router.history(DEFAULT_HISTORY_LIMIT).cloned().collect(),
        }
    }

    pub fn shutdown(&mut self) {
        self.connection.shutdown();
        self.display.cancel();
    }

    fn send(&mut self, msg: SyncMessage) -> bool {
        let sent = self.connection.send(&msg);
        if sent {
            self.router.record_sent(&msg);
        }
        sent
    }

    /// Registry outbox to the wire, change stream to the display.
    fn flush(&mut self) {
        let outbound: Vec<SyncMessage> = self.registry.drain_outbox().collect();
        for msg in outbound {
            self.send(msg);
        }
        let now = self.clock.now_ms();
        let changes: Vec<_> = self.registry.drain_changes().collect();
        for change in changes {
            self.display.on_change(change, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::connection::tests::RecordingTransport;
    use crate::registry::demo_parameters;
    use crate::router::Direction;
    use std::sync::Arc;

    fn session() -> (SyncSession, RecordingTransport, ManualClock) {
        let clock = ManualClock::new(10_000);
        let transport = RecordingTransport::default();
        let s = SyncSession::new(
            &SyncConfig::default(),
            Arc::new(clock.clone()),
            Box::new(transport.clone()),
        );
        (s, transport, clock)
    }

    fn opened(s: &SyncSession) -> TransportEvent {
        TransportEvent::Opened {
            attempt: s.connection().generation(),
        }
    }

    fn connected() -> (SyncSession, RecordingTransport, ManualClock) {
        let (mut s, t, c) = session();
        s.connection_mut().connect();
        let event = opened(&s);
        s.handle_transport_event(event);
        (s, t, c)
    }

    #[test]
    fn opening_requests_peer_state() {
        let (s, transport, _) = connected();
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("request_parameter_state"));
        assert_eq!(s.router().history(1).next().unwrap().direction, Direction::Sent);
    }

    #[test]
    fn local_edits_go_out_and_reach_the_display() {
        let (mut s, transport, _) = connected();
        s.load_parameters(demo_parameters());
        assert!(s.set_value("tone", 0.25));
        let sent = transport.sent();
        assert!(sent[1].contains("parameter_structure_sync"));
        assert!(sent[2].contains("parameter_value_sync"));
        let shown = s.display().current().unwrap();
        assert_eq!((shown.name.as_str(), shown.text.as_str()), ("Tone", "25%"));
    }

    #[test]
    fn inbound_value_sync_is_never_echoed() {
        let (mut s, transport, _) = connected();
        s.load_parameters(demo_parameters());
        let before = transport.sent().len();
        s.on_frame(r#"{"type":"parameter_value_sync","updates":[{"id":"mix","value":0.1}],"timestamp":1}"#);
        assert_eq!(transport.sent().len(), before);
        assert_eq!(s.registry().get("mix").unwrap().value, 0.1);
        assert_eq!(s.display().current().unwrap().text, "10%");
        assert!(s.connection().activity().receiving);
    }

    #[test]
    fn edits_while_offline_update_locally_only() {
        let (mut s, transport, _) = session();
        s.load_parameters(demo_parameters());
        assert!(s.set_value("drive", 0.9));
        assert!(transport.sent().is_empty());
        assert_eq!(s.router().history_len(), 0);
    }

    #[test]
    fn failed_handshake_schedules_retry() {
        let (mut s, _, _) = session();
        s.connection_mut().connect();
        let attempt = s.connection().generation();
        s.handle_transport_event(TransportEvent::Failed {
            attempt,
            reason: "refused".to_string(),
        });
        assert_eq!(s.next_deadline(), Some(12_000));
        assert_eq!(s.snapshot().attempts, 1);
    }

    #[test]
    fn shutdown_cancels_every_timer() {
        let (mut s, _, _) = connected();
        s.load_parameters(demo_parameters());
        s.set_value("knee", 0.8);
        assert!(s.next_deadline().is_some());
        s.shutdown();
        assert_eq!(s.next_deadline(), None);
        assert_eq!(s.snapshot().status, "Disconnected");
    }

    #[test]
    fn disabling_the_large_display_keeps_tracking_changes() {
        let (mut s, _, _) = connected();
        s.load_parameters(demo_parameters());
        s.set_large_display(false);
        assert!(!s.display().is_enabled());
        s.set_value("ratio", 1.0);
        assert_eq!(s.display().current(), None);
        assert_eq!(s.display().last_change().unwrap().text, "∞:1");
    }

    #[test]
    fn completions_from_a_superseded_handshake_are_dropped() {
        let (mut s, transport, clock) = session();
        s.connection_mut().connect();
        let first = s.connection().generation();
        clock.advance(20);
        s.connection_mut().reconnect();
        clock.advance(100);
        s.poll(clock.now_ms());
        assert_eq!(s.connection().state(), ConnectionState::Connecting);

        s.handle_transport_event(TransportEvent::Opened { attempt: first });
        assert_eq!(s.connection().state(), ConnectionState::Connecting);
        s.handle_transport_event(TransportEvent::Frame {
            attempt: first,
            text: r#"{"type":"parameter_structure_sync","parameters":[{"id":"x","name":"X"}],"timestamp":1}"#
                .to_string(),
        });
        assert!(s.registry().is_empty());

        let event = opened(&s);
        s.handle_transport_event(event);
        assert!(s.connection().is_connected());
        let calls_before = transport.calls().len();
        s.handle_transport_event(TransportEvent::Closed {
            attempt: first,
            code: ABNORMAL_CLOSURE,
        });
        assert!(s.connection().is_connected());
        assert_eq!(transport.calls().len(), calls_before);
    }

    #[test]
    fn late_failure_of_an_old_attempt_schedules_nothing() {
        let (mut s, _, clock) = session();
        s.connection_mut().connect();
        let first = s.connection().generation();
        s.connection_mut().select_endpoint("pi").unwrap();
        clock.advance(100);
        s.poll(clock.now_ms());

        s.handle_transport_event(TransportEvent::Failed {
            attempt: first,
            reason: "timed out".to_string(),
        });
        let snap = s.snapshot();
        assert_eq!(snap.status, "Connecting");
        assert_eq!(snap.endpoint, "pi");
        assert_eq!(snap.attempts, 0);
        assert_eq!(s.next_deadline(), None);
    }
}
