//! Canonical parameter set shared by every client on the channel.
//!
//! Inbound sync messages are applied silently; only local mutations
//! ([`Origin::Local`]) produce outbound messages. That asymmetry is what keeps
//! peers from echoing each other's changes forever. Outbound messages and the
//! per-parameter change stream are queued here and drained by the session.

use crate::clock::{Millis, SharedClock};
use crate::color;
use crate::format::ParamCategory;
use crate::hash::{self, JsNumber, StableFields};
use crate::router::MessageRouter;
use mastrctrl_protocol::{
    ColorUpdate, MessageKind, Rgb, SyncMessage, ValueUpdate, WireParameter,
};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

pub const DEFAULT_LED_COUNT: u32 = 28;
pub const DEFAULT_MIN: f64 = 0.0;
pub const DEFAULT_MAX: f64 = 1.0;
pub const DEFAULT_STEP: f64 = 0.01;
pub const DEFAULT_FORMAT: &str = "percentage";
pub const DEFAULT_VALUE: f64 = 0.5;

/// Where a mutation came from. Only local mutations are broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDescriptor {
    pub id: String,
    pub index: u32,
    pub name: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub format: String,
    pub default_value: f64,
    pub color: String,
    pub rgb_color: Rgb,
    pub led_count: u32,
    pub text: String,
    #[serde(skip)]
    pub category: ParamCategory,
}

impl ParameterDescriptor {
    pub fn from_wire(wire: WireParameter, position: usize) -> Self {
        let category = ParamCategory::from_name(&wire.name);
        let (color, rgb_color) = color::resolve(wire.color.as_deref(), wire.rgb_color)
            .unwrap_or_else(|| {
                let preset = category.preset_color();
                (preset.to_string(), color::hex_to_rgb(preset).unwrap_or_default())
            });
        let default_value = wire.default_value.unwrap_or(DEFAULT_VALUE);
        let value = clamp_unit(wire.value.filter(|v| v.is_finite()).unwrap_or(default_value));

        Self {
            index: wire.index.unwrap_or(position as u32),
            text: category.format_value(value),
            id: wire.id,
            name: wire.name,
            value,
            min: wire.min.unwrap_or(DEFAULT_MIN),
            max: wire.max.unwrap_or(DEFAULT_MAX),
            step: wire.step.unwrap_or(DEFAULT_STEP),
            format: wire.format.unwrap_or_else(|| DEFAULT_FORMAT.to_string()),
            default_value,
            color,
            rgb_color,
            led_count: wire.led_count.filter(|n| *n > 0).unwrap_or(DEFAULT_LED_COUNT),
            category,
        }
    }

    pub fn to_wire(&self) -> WireParameter {
        WireParameter {
            id: self.id.clone(),
            name: self.name.clone(),
            index: Some(self.index),
            value: Some(self.value),
            min: Some(self.min),
            max: Some(self.max),
            step: Some(self.step),
            format: Some(self.format.clone()),
            default_value: Some(self.default_value),
            color: Some(self.color.clone()),
            rgb_color: Some(self.rgb_color),
            led_count: Some(self.led_count),
            text: Some(self.text.clone()),
        }
    }

    fn stable_fields(&self) -> StableFields<'_> {
        StableFields {
            id: &self.id,
            name: &self.name,
            min: JsNumber(self.min),
            max: JsNumber(self.max),
            step: JsNumber(self.step),
            format: &self.format,
        }
    }
}

/// One entry of the change stream consumed by the display.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterChange {
    pub id: String,
    pub name: String,
    pub text: String,
    pub value: f64,
    pub origin: Origin,
}

/// The single mutation shape both `parameter_value_sync` and
/// `parameter_color_sync` entries are folded into.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DescriptorUpdate {
    pub id: String,
    pub value: Option<f64>,
    pub color: Option<String>,
    pub rgb_color: Option<Rgb>,
}

impl From<ValueUpdate> for DescriptorUpdate {
    fn from(u: ValueUpdate) -> Self {
        // `text` is derived data; receivers regenerate it.
        Self {
            id: u.id,
            value: u.value,
            color: None,
            rgb_color: u.rgb_color,
        }
    }
}

impl From<ColorUpdate> for DescriptorUpdate {
    fn from(u: ColorUpdate) -> Self {
        Self {
            id: u.id,
            value: None,
            color: u.color,
            rgb_color: u.rgb_color,
        }
    }
}

pub struct ParameterRegistry {
    clock: SharedClock,
    parameters: Vec<ParameterDescriptor>,
    structure_hash: Option<String>,
    last_structure_update: Option<Millis>,
    outbox: VecDeque<SyncMessage>,
    changes: VecDeque<ParameterChange>,
}

impl ParameterRegistry {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            parameters: Vec::new(),
            structure_hash: None,
            last_structure_update: None,
            outbox: VecDeque::new(),
            changes: VecDeque::new(),
        }
    }

    /// Installs the four inbound sync handlers.
    pub fn register_handlers(router: &mut MessageRouter<ParameterRegistry>) {
        for kind in [
            MessageKind::StructureSync,
            MessageKind::ValueSync,
            MessageKind::ColorSync,
            MessageKind::RequestState,
        ] {
            router.register_handler(kind, |registry: &mut ParameterRegistry, msg| {
                registry.handle(msg)
            });
        }
    }

    pub fn handle(&mut self, msg: SyncMessage) {
        match msg {
            SyncMessage::ParameterStructureSync {
                structure_hash,
                parameters,
                ..
            } => {
                self.apply_structure_sync(&structure_hash, parameters);
            }
            SyncMessage::ParameterValueSync { updates, .. } => {
                self.apply_updates(updates.into_iter().map(DescriptorUpdate::from), Origin::Remote);
            }
            SyncMessage::ParameterColorSync { updates, .. } => {
                self.apply_updates(updates.into_iter().map(DescriptorUpdate::from), Origin::Remote);
            }
            SyncMessage::RequestParameterState { .. } => {
                self.handle_state_request();
            }
            SyncMessage::ParameterUpdate { .. } | SyncMessage::LedUpdate { .. } => {
                debug!(kind = msg.kind().as_str(), "hardware command is not registry state");
            }
        }
    }

    pub fn parameters(&self) -> &[ParameterDescriptor] {
        &self.parameters
    }

    pub fn get(&self, id: &str) -> Option<&ParameterDescriptor> {
        self.parameters.iter().find(|p| p.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// `false` until the first structure arrives or is loaded, even an empty one.
    pub fn is_initialized(&self) -> bool {
        self.structure_hash.is_some()
    }

    pub fn structure_hash(&self) -> Option<&str> {
        self.structure_hash.as_deref()
    }

    pub fn last_structure_update(&self) -> Option<Millis> {
        self.last_structure_update
    }

    pub fn compute_structure_hash(&self) -> String {
        hash::structure_hash(self.parameters.iter().map(ParameterDescriptor::stable_fields))
    }

    /// Returns `false` when the hash matches what we already hold.
    pub fn apply_structure_sync(&mut self, structure_hash: &str, parameters: Vec<WireParameter>) -> bool {
        if !structure_hash.is_empty() && self.structure_hash.as_deref() == Some(structure_hash) {
            debug!(hash = structure_hash, "structure unchanged, skipping");
            return false;
        }
        self.replace_all(parameters);
        self.structure_hash = Some(structure_hash.to_string());
        self.last_structure_update = Some(self.clock.now_ms());
        info!(count = self.parameters.len(), "applied parameter structure from peer");
        true
    }

    /// Re-broadcasts our structure so a late joiner can hydrate. Returns whether
    /// anything was sent.
    pub fn handle_state_request(&mut self) -> bool {
        if self.parameters.is_empty() {
            debug!("state requested but no parameters loaded");
            return false;
        }
        self.broadcast_structure();
        true
    }

    pub fn set_value(&mut self, id: &str, value: f64, origin: Origin) -> bool {
        self.apply_update(
            DescriptorUpdate {
                id: id.to_string(),
                value: Some(value),
                ..DescriptorUpdate::default()
            },
            origin,
        )
    }

    pub fn set_color(&mut self, id: &str, color: &str, origin: Origin) -> bool {
        self.apply_update(
            DescriptorUpdate {
                id: id.to_string(),
                color: Some(color.to_string()),
                ..DescriptorUpdate::default()
            },
            origin,
        )
    }

    pub fn apply_updates(
        &mut self,
        updates: impl IntoIterator<Item = DescriptorUpdate>,
        origin: Origin,
    ) -> usize {
        updates
            .into_iter()
            .filter(|u| self.apply_update(u.clone(), origin))
            .count()
    }

    /// The one mutation path for value and color. Unknown ids are stale updates
    /// and are ignored.
    pub fn apply_update(&mut self, update: DescriptorUpdate, origin: Origin) -> bool {
        let Some(param) = self.parameters.iter_mut().find(|p| p.id == update.id) else {
            debug!(id = %update.id, "ignoring update for unknown parameter");
            return false;
        };

        let mut value_changed = false;
        if let Some(value) = update.value {
            if value.is_finite() {
                param.value = clamp_unit(value);
                param.text = param.category.format_value(param.value);
                value_changed = true;
            } else {
                warn!(id = %param.id, "ignoring non-finite value");
            }
        }

        let color_changed = match color::resolve(update.color.as_deref(), update.rgb_color) {
            Some((hex, rgb)) => {
                param.color = hex;
                param.rgb_color = rgb;
                true
            }
            None => false,
        };

        if value_changed {
            self.changes.push_back(ParameterChange {
                id: param.id.clone(),
                name: param.name.clone(),
                text: param.text.clone(),
                value: param.value,
                origin,
            });
        }

        if origin == Origin::Local {
            let timestamp = self.clock.now_ms();
            if value_changed {
                self.outbox.push_back(SyncMessage::ParameterValueSync {
                    updates: vec![ValueUpdate {
                        id: param.id.clone(),
                        value: Some(param.value),
                        text: Some(param.text.clone()),
                        rgb_color: Some(param.rgb_color),
                    }],
                    timestamp,
                });
            }
            if color_changed {
                self.outbox.push_back(SyncMessage::ParameterColorSync {
                    updates: vec![ColorUpdate {
                        id: param.id.clone(),
                        color: Some(param.color.clone()),
                        rgb_color: Some(param.rgb_color),
                    }],
                    timestamp,
                });
            }
        }

        value_changed || color_changed
    }

    /// Replaces the whole set locally and announces it.
    pub fn load_parameters(&mut self, parameters: Vec<WireParameter>) {
        self.replace_all(parameters);
        info!(count = self.parameters.len(), "loaded parameter set");
        self.broadcast_structure();
    }

    /// Empties the set and announces the empty list, which peers read as
    /// "no parameter set active".
    pub fn clear_parameters(&mut self) {
        self.parameters.clear();
        info!("cleared parameter set");
        self.broadcast_structure();
    }

    pub fn broadcast_structure(&mut self) {
        let structure_hash = self.compute_structure_hash();
        let now = self.clock.now_ms();
        self.outbox.push_back(SyncMessage::ParameterStructureSync {
            structure_hash: structure_hash.clone(),
            parameters: self.parameters.iter().map(ParameterDescriptor::to_wire).collect(),
            timestamp: now,
        });
        self.structure_hash = Some(structure_hash);
        self.last_structure_update = Some(now);
    }

    pub fn drain_outbox(&mut self) -> impl Iterator<Item = SyncMessage> + '_ {
        self.outbox.drain(..)
    }

    pub fn drain_changes(&mut self) -> impl Iterator<Item = ParameterChange> + '_ {
        self.changes.drain(..)
    }

    fn replace_all(&mut self, parameters: Vec<WireParameter>) {
        let mut next: Vec<ParameterDescriptor> = Vec::with_capacity(parameters.len());
        for (position, wire) in parameters.into_iter().enumerate() {
            let descriptor = ParameterDescriptor::from_wire(wire, position);
            match next.iter_mut().find(|p| p.id == descriptor.id) {
                Some(existing) => {
                    warn!(id = %descriptor.id, "duplicate parameter id, keeping the later entry");
                    *existing = descriptor;
                }
                None => next.push(descriptor),
            }
        }
        self.parameters = next;
    }
}

pub fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// The ten-knob compressor/drive set used for demos and offline development.
pub fn demo_parameters() -> Vec<WireParameter> {
    const DEMO: &[(&str, &str, f64, f64)] = &[
        ("input-gain", "Input Gain", 0.75, 0.5),
        ("drive", "Drive", 0.3, 0.0),
        ("tone", "Tone", 0.6, 0.5),
        ("output-level", "Output Level", 0.8, 0.7),
        ("mix", "Mix", 0.5, 0.5),
        ("attack", "Attack", 0.2, 0.1),
        ("release", "Release", 0.4, 0.3),
        ("threshold", "Threshold", 0.6, 0.5),
        ("ratio", "Ratio", 0.7, 0.5),
        ("knee", "Knee", 0.3, 0.0),
    ];
    DEMO.iter()
        .enumerate()
        .map(|(index, (id, name, value, default_value))| WireParameter {
            id: id.to_string(),
            name: name.to_string(),
            index: Some(index as u32),
            value: Some(*value),
            default_value: Some(*default_value),
            led_count: Some(DEFAULT_LED_COUNT),
            ..WireParameter::default()
        })
        .collect()
}
