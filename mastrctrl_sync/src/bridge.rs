//! Adapter between the host audio engine's plugin notifications and the registry.
//!
//! The host addresses parameters by index; the channel addresses them by id.
//! Ids are slugs of the parameter names, suffixed with the index when two names
//! slug to the same thing.

use crate::registry::{Origin, ParameterRegistry};
use mastrctrl_protocol::WireParameter;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostParameter {
    pub index: u32,
    pub name: String,
    #[serde(default)]
    pub label: String,
    pub current_value: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    #[serde(rename_all = "camelCase")]
    PluginLoaded {
        plugin_name: String,
        parameters: Vec<HostParameter>,
    },
    ParameterChanged {
        index: u32,
        value: f64,
    },
    PluginUnloaded,
}

#[derive(Debug, Default)]
pub struct HostBridge {
    plugin_name: Option<String>,
    ids_by_index: HashMap<u32, String>,
}

impl HostBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plugin_name(&self) -> Option<&str> {
        self.plugin_name.as_deref()
    }

    pub fn apply(&mut self, event: HostEvent, registry: &mut ParameterRegistry) {
        match event {
            HostEvent::PluginLoaded {
                plugin_name,
                parameters,
            } => {
                info!(plugin = %plugin_name, count = parameters.len(), "host plugin loaded");
                self.ids_by_index.clear();
                let wire = parameters
                    .into_iter()
                    .enumerate()
                    .map(|(position, p)| self.to_wire(p, position))
                    .collect();
                self.plugin_name = Some(plugin_name);
                registry.load_parameters(wire);
            }
            HostEvent::ParameterChanged { index, value } => match self.ids_by_index.get(&index) {
                Some(id) => {
                    registry.set_value(id, value, Origin::Local);
                }
                None => debug!(index, "host changed a parameter we never loaded"),
            },
            HostEvent::PluginUnloaded => {
                info!("host plugin unloaded");
                self.plugin_name = None;
                self.ids_by_index.clear();
                registry.clear_parameters();
            }
        }
    }

    fn to_wire(&mut self, param: HostParameter, position: usize) -> WireParameter {
        let mut id = slugify(&param.name);
        if id.is_empty() || self.ids_by_index.values().any(|known| *known == id) {
            id = if id.is_empty() {
                format!("param-{}", param.index)
            } else {
                format!("{id}-{}", param.index)
            };
        }
        self.ids_by_index.insert(param.index, id.clone());
        WireParameter {
            id,
            name: param.name,
            index: Some(u32::try_from(position).unwrap_or(param.index)),
            value: Some(param.current_value),
            ..WireParameter::default()
        }
    }
}

/// Lowercase ASCII alphanumerics joined by single dashes.
pub fn slugify(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use mastrctrl_protocol::SyncMessage;
    use std::sync::Arc;

    fn host_param(index: u32, name: &str, value: f64) -> HostParameter {
        HostParameter {
            index,
            name: name.to_string(),
            label: String::new(),
            current_value: value,
        }
    }

    #[test]
    fn slugs() {
        assert_eq!(slugify("Input Gain"), "input-gain");
        assert_eq!(slugify("  Hi/Lo  Cut "), "hi-lo-cut");
        assert_eq!(slugify("???"), "");
    }

    #[test]
    fn plugin_lifecycle_drives_the_registry() {
        let mut reg = ParameterRegistry::new(Arc::new(ManualClock::new(0)));
        let mut bridge = HostBridge::new();

        bridge.apply(
            HostEvent::PluginLoaded {
                plugin_name: "Comp".to_string(),
                parameters: vec![
                    host_param(3, "Drive", 0.2),
                    host_param(7, "Drive", 0.4),
                    host_param(9, "%%", 0.6),
                ],
            },
            &mut reg,
        );
        let ids: Vec<&str> = reg.parameters().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["drive", "drive-7", "param-9"]);
        assert!(matches!(
            reg.drain_outbox().next(),
            Some(SyncMessage::ParameterStructureSync { .. })
        ));

        bridge.apply(HostEvent::ParameterChanged { index: 7, value: 0.9 }, &mut reg);
        bridge.apply(HostEvent::ParameterChanged { index: 99, value: 0.1 }, &mut reg);
        assert_eq!(reg.get("drive-7").unwrap().value, 0.9);
        assert_eq!(reg.drain_outbox().count(), 1);

        bridge.apply(HostEvent::PluginUnloaded, &mut reg);
        assert!(reg.is_empty());
        assert_eq!(bridge.plugin_name(), None);
    }

    #[test]
    fn host_events_decode_from_json() {
        let raw = r#"{"event":"plugin_loaded","pluginName":"Amp","parameters":[{"index":0,"name":"Tone","label":"%","currentValue":0.5}]}"#;
        let event: HostEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(event, HostEvent::PluginLoaded { ref parameters, .. } if parameters.len() == 1));
    }
}
