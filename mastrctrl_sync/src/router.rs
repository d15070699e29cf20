use crate::clock::{Millis, SharedClock};
use crate::error::ProtocolError;
use mastrctrl_protocol::{MessageKind, SyncMessage};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub message: Value,
    pub direction: Direction,
    pub timestamp: Millis,
}

/// What happened to a frame that parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Dispatched(MessageKind),
    /// Known kind, but nobody registered for it.
    Unhandled(MessageKind),
    Unrecognized(String),
}

pub type Handler<C> = Box<dyn FnMut(&mut C, SyncMessage) + Send>;

/// Inbound frame parser and dispatcher. `C` is whatever the handlers mutate.
pub struct MessageRouter<C> {
    clock: SharedClock,
    handlers: HashMap<MessageKind, Handler<C>>,
    history: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl<C> MessageRouter<C> {
    pub fn new(clock: SharedClock, capacity: usize) -> Self {
        Self {
            clock,
            handlers: HashMap::new(),
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Replaces any handler already registered for `kind`.
    pub fn register_handler(
        &mut self,
        kind: MessageKind,
        handler: impl FnMut(&mut C, SyncMessage) + Send + 'static,
    ) {
        if self.handlers.insert(kind, Box::new(handler)).is_some() {
            debug!(kind = kind.as_str(), "replaced message handler");
        }
    }

    pub fn unregister_handler(&mut self, kind: MessageKind) {
        self.handlers.remove(&kind);
    }

    pub fn has_handler(&self, kind: MessageKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Routes one raw frame. Protocol errors are logged here and never escape.
    pub fn on_message(&mut self, ctx: &mut C, raw: &str) -> Option<Routed> {
        match self.route(ctx, raw) {
            Ok(routed) => Some(routed),
            Err(e) => {
                warn!(error = %e, len = raw.len(), "dropping inbound frame");
                None
            }
        }
    }

    pub fn route(&mut self, ctx: &mut C, raw: &str) -> Result<Routed, ProtocolError> {
        let value: Value = serde_json::from_str(raw)?;
        let ty = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_string();

        self.push_history(value.clone(), Direction::Received);

        let Some(kind) = MessageKind::from_type(&ty) else {
            debug!(message_type = %ty, "unrecognized message type");
            return Ok(Routed::Unrecognized(ty));
        };

        let msg: SyncMessage =
            serde_json::from_value(value).map_err(|e| ProtocolError::Payload {
                kind: kind.as_str(),
                reason: e.to_string(),
            })?;

        match self.handlers.get_mut(&kind) {
            Some(handler) => {
                handler(ctx, msg);
                Ok(Routed::Dispatched(kind))
            }
            None => Ok(Routed::Unhandled(kind)),
        }
    }

    pub fn record_sent(&mut self, msg: &SyncMessage) {
        match serde_json::to_value(msg) {
            Ok(value) => self.push_history(value, Direction::Sent),
            Err(e) => warn!(error = %e, "could not record sent message"),
        }
    }

    /// Newest first.
    pub fn history(&self, limit: usize) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter().take(limit)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    fn push_history(&mut self, message: Value, direction: Direction) {
        if self.capacity == 0 {
            return;
        }
        self.history.push_front(HistoryEntry {
            message,
            direction,
            timestamp: self.clock.now_ms(),
        });
        self.history.truncate(self.capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    #[derive(Default)]
    struct Seen {
        kinds: Vec<&'static str>,
    }

    fn router() -> MessageRouter<Seen> {
        MessageRouter::new(Arc::new(ManualClock::new(0)), DEFAULT_HISTORY_CAPACITY)
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let mut r = router();
        r.register_handler(MessageKind::RequestState, |s: &mut Seen, _| s.kinds.push("first"));
        r.register_handler(MessageKind::RequestState, |s: &mut Seen, _| s.kinds.push("second"));
        let mut seen = Seen::default();
        let routed = r.on_message(&mut seen, r#"{"type":"request_parameter_state","timestamp":1}"#);
        assert_eq!(routed, Some(Routed::Dispatched(MessageKind::RequestState)));
        assert_eq!(seen.kinds, vec!["second"]);

        assert!(r.has_handler(MessageKind::RequestState));
        r.unregister_handler(MessageKind::RequestState);
        assert!(!r.has_handler(MessageKind::RequestState));
        let routed = r.on_message(&mut seen, r#"{"type":"request_parameter_state"}"#);
        assert_eq!(routed, Some(Routed::Unhandled(MessageKind::RequestState)));
        assert_eq!(seen.kinds.len(), 1);
    }

    #[test]
    fn garbage_and_untyped_frames_are_dropped_without_history() {
        let mut r = router();
        let mut seen = Seen::default();
        assert_eq!(r.on_message(&mut seen, "{not json"), None);
        assert_eq!(r.on_message(&mut seen, r#"{"updates":[]}"#), None);
        assert_eq!(r.on_message(&mut seen, r#"{"type":42}"#), None);
        assert_eq!(r.history_len(), 0);
    }

    #[test]
    fn unknown_types_are_recorded_but_ignored() {
        let mut r = router();
        let mut seen = Seen::default();
        let routed = r.on_message(&mut seen, r#"{"type":"vu_meter","level":-6}"#);
        assert_eq!(routed, Some(Routed::Unrecognized("vu_meter".to_string())));
        assert_eq!(r.history_len(), 1);
        assert_eq!(r.history(1).next().unwrap().direction, Direction::Received);
    }

    #[test]
    fn malformed_payload_of_known_kind_is_not_dispatched() {
        let mut r = router();
        r.register_handler(MessageKind::ValueSync, |s: &mut Seen, _| s.kinds.push("value"));
        let mut seen = Seen::default();
        let routed = r.on_message(&mut seen, r#"{"type":"parameter_value_sync","updates":"nope"}"#);
        assert_eq!(routed, None);
        assert!(seen.kinds.is_empty());
    }

    #[test]
    fn history_keeps_fifty_newest_first() {
        let mut r = router();
        let mut seen = Seen::default();
        for i in 0..60 {
            r.on_message(&mut seen, &format!(r#"{{"type":"request_parameter_state","timestamp":{i}}}"#));
        }
        assert_eq!(r.history_len(), 50);
        let stamps: Vec<u64> = r
            .history(usize::MAX)
            .map(|e| e.message["timestamp"].as_u64().unwrap())
            .collect();
        let expected: Vec<u64> = (10..60).rev().collect();
        assert_eq!(stamps, expected);
        assert_eq!(r.history(DEFAULT_HISTORY_LIMIT).count(), 10);
    }

    #[test]
    fn sent_messages_are_tagged() {
        let mut r = router();
        r.record_sent(&SyncMessage::RequestParameterState { timestamp: 3 });
        let entry = r.history(1).next().unwrap();
        assert_eq!(entry.direction, Direction::Sent);
        assert_eq!(entry.message["type"], MessageKind::RequestState.as_str());
        r.clear_history();
        assert_eq!(r.history_len(), 0);
    }
}
