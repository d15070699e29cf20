use crate::clock::Millis;
use crate::error::ConfigError;
use std::time::Duration;
use tracing::warn;
use url::Url;

pub const DEFAULT_PORT: u16 = 8765;
pub const FADE_DELAY_MIN: Duration = Duration::from_secs(1);
pub const FADE_DELAY_MAX: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub id: String,
    pub name: String,
    pub url: Url,
}

impl ServerEndpoint {
    pub fn new(id: &str, name: &str, url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            url: parse_ws_url(url)?,
        })
    }
}

pub fn parse_ws_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::UnsupportedScheme(other.to_string())),
    }
}

/// Named endpoints with exactly one selected entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointList {
    entries: Vec<ServerEndpoint>,
    selected: usize,
}

impl EndpointList {
    pub fn new(entries: Vec<ServerEndpoint>, default_id: Option<&str>) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::EmptyEndpoints);
        }
        let selected = match default_id {
            Some(id) => entries
                .iter()
                .position(|e| e.id == id)
                .ok_or_else(|| ConfigError::UnknownEndpoint(id.to_string()))?,
            None => 0,
        };
        Ok(Self { entries, selected })
    }

    pub fn current(&self) -> &ServerEndpoint {
        &self.entries[self.selected]
    }

    pub fn get(&self, id: &str) -> Option<&ServerEndpoint> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerEndpoint> {
        self.entries.iter()
    }

    /// Returns `true` when the selection actually moved.
    pub fn select(&mut self, id: &str) -> Result<bool, ConfigError> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| ConfigError::UnknownEndpoint(id.to_string()))?;
        let changed = idx != self.selected;
        self.selected = idx;
        Ok(changed)
    }

    /// Adds or replaces an entry by id and selects it.
    pub fn upsert_and_select(&mut self, endpoint: ServerEndpoint) {
        match self.entries.iter().position(|e| e.id == endpoint.id) {
            Some(idx) => {
                self.entries[idx] = endpoint;
                self.selected = idx;
            }
            None => {
                self.entries.push(endpoint);
                self.selected = self.entries.len() - 1;
            }
        }
    }
}

const DEFAULT_ENDPOINTS: &[(&str, &str, &str)] = &[
    ("local", "This machine", "ws://127.0.0.1:8765"),
    ("pi", "Controller Pi", "ws://192.168.1.195:8765"),
];

impl Default for EndpointList {
    fn default() -> Self {
        let entries = DEFAULT_ENDPOINTS
            .iter()
            .filter_map(|(id, name, url)| ServerEndpoint::new(id, name, url).ok())
            .collect();
        Self {
            entries,
            selected: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// `min(base * 2^attempt, max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub endpoints: EndpointList,
    pub backoff: BackoffPolicy,
    /// Pause between the disconnect and connect halves of a manual reconnect.
    pub settle_delay: Duration,
    /// A handshake still pending after this long counts as failed.
    pub handshake_timeout: Duration,
    pub activity_hold: Duration,
    pub quiet_period: Duration,
    pub fade_delay: Duration,
    pub large_display: bool,
    pub history_capacity: usize,
    /// Ask peers for their parameter set as soon as the channel opens.
    pub request_state_on_connect: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoints: EndpointList::default(),
            backoff: BackoffPolicy::default(),
            settle_delay: Duration::from_millis(100),
            handshake_timeout: Duration::from_secs(5),
            activity_hold: Duration::from_millis(500),
            quiet_period: Duration::from_millis(150),
            fade_delay: Duration::from_secs(3),
            large_display: true,
            history_capacity: 50,
            request_state_on_connect: true,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    pub fn apply_env_with(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let env_url = lookup("MASTRCTRL_WS_URL").or_else(|| lookup("WEBSOCKET_URL"));
        if let Some(url) = env_url.filter(|u| !u.trim().is_empty()) {
            let endpoint = ServerEndpoint::new("env", "Environment", &url)?;
            self.endpoints.upsert_and_select(endpoint);
        } else if let Some(id) = lookup("MASTRCTRL_ENDPOINT") {
            self.endpoints.select(id.trim())?;
        }

        if let Some(raw) = lookup("MASTRCTRL_FADE_DELAY_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) => self.fade_delay = clamp_fade_delay(Duration::from_secs(secs)),
                Err(_) => warn!(value = %raw, "ignoring MASTRCTRL_FADE_DELAY_SECS (not a number)"),
            }
        }

        if let Some(raw) = lookup("MASTRCTRL_LARGE_DISPLAY") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => self.large_display = true,
                "0" | "false" | "off" | "no" => self.large_display = false,
                other => warn!(value = other, "ignoring MASTRCTRL_LARGE_DISPLAY"),
            }
        }
        Ok(())
    }
}

pub fn clamp_fade_delay(delay: Duration) -> Duration {
    delay.clamp(FADE_DELAY_MIN, FADE_DELAY_MAX)
}

pub(crate) fn as_millis(d: Duration) -> Millis {
    d.as_millis().min(u128::from(Millis::MAX)) as Millis
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let p = BackoffPolicy::default();
        let delays: Vec<u128> = (1..=6).map(|a| p.delay_for(a).as_millis()).collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 30000, 30000]);
        assert_eq!(p.delay_for(200), p.max_delay);
    }

    #[test]
    fn env_url_wins_and_is_selected() {
        let mut cfg = SyncConfig::default();
        cfg.apply_env_with(env(&[
            ("WEBSOCKET_URL", "ws://10.0.0.5:8765"),
            ("MASTRCTRL_ENDPOINT", "pi"),
        ]))
        .unwrap();
        assert_eq!(cfg.endpoints.current().id, "env");
        assert_eq!(cfg.endpoints.current().url.as_str(), "ws://10.0.0.5:8765/");
    }

    #[test]
    fn fade_delay_from_env_is_clamped() {
        let mut cfg = SyncConfig::default();
        cfg.apply_env_with(env(&[("MASTRCTRL_FADE_DELAY_SECS", "60"), ("MASTRCTRL_LARGE_DISPLAY", "off")]))
            .unwrap();
        assert_eq!(cfg.fade_delay, FADE_DELAY_MAX);
        assert!(!cfg.large_display);
    }

    #[test]
    fn http_urls_are_rejected() {
        let err = ServerEndpoint::new("x", "X", "http://127.0.0.1:8765").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedScheme(s) if s == "http"));
    }

    #[test]
    fn selecting_an_unknown_endpoint_fails() {
        let mut list = EndpointList::default();
        assert!(matches!(list.select("nope"), Err(ConfigError::UnknownEndpoint(_))));
        assert_eq!(list.select("pi").unwrap(), true);
        assert_eq!(list.select("pi").unwrap(), false);
    }
}
