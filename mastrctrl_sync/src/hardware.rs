//! LED ring rendering and the legacy commands understood by the knob hardware.

use crate::clock::Millis;
use crate::registry::{clamp_unit, ParameterDescriptor, ParameterRegistry};
use mastrctrl_protocol::{LedStrip, Rgb, SyncMessage};

/// Unlit ring segments.
pub const LED_OFF: Rgb = Rgb::new(51, 51, 51);

/// Which LED of a `led_count` ring marks `value`.
pub fn active_led_index(value: f64, led_count: u32) -> usize {
    if led_count == 0 {
        return 0;
    }
    (clamp_unit(value) * f64::from(led_count - 1)).floor() as usize
}

pub fn ring_for(param: &ParameterDescriptor) -> Vec<Rgb> {
    let active = active_led_index(param.value, param.led_count);
    (0..param.led_count as usize)
        .map(|i| if i == active { param.rgb_color } else { LED_OFF })
        .collect()
}

pub fn fastled(rgb: Rgb) -> String {
    format!("CRGB({}, {}, {})", rgb.r, rgb.g, rgb.b)
}

impl ParameterRegistry {
    pub fn led_ring(&self, id: &str) -> Option<Vec<Rgb>> {
        self.get(id).map(ring_for)
    }

    pub fn led_strips(&self) -> Vec<LedStrip> {
        self.parameters()
            .iter()
            .map(|p| LedStrip {
                param_id: p.id.clone(),
                leds: ring_for(p).into_iter().map(fastled).collect(),
            })
            .collect()
    }
}

pub fn parameter_update(parameter: &str, value: f64, timestamp: Millis) -> SyncMessage {
    SyncMessage::ParameterUpdate {
        parameter: parameter.to_string(),
        value: clamp_unit(value),
        timestamp,
    }
}

pub fn led_update(registry: &ParameterRegistry, timestamp: Millis) -> SyncMessage {
    SyncMessage::LedUpdate {
        data: registry.led_strips(),
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::registry::{demo_parameters, Origin};
    use std::sync::Arc;

    #[test]
    fn active_index_spans_the_ring() {
        assert_eq!(active_led_index(0.0, 28), 0);
        assert_eq!(active_led_index(0.5, 28), 13);
        assert_eq!(active_led_index(1.0, 28), 27);
        assert_eq!(active_led_index(3.0, 28), 27);
        assert_eq!(active_led_index(0.5, 0), 0);
    }

    #[test]
    fn ring_lights_one_led_in_the_parameter_color() {
        let mut reg = ParameterRegistry::new(Arc::new(ManualClock::new(0)));
        reg.load_parameters(demo_parameters());
        reg.set_value("drive", 1.0, Origin::Remote);
        let ring = reg.led_ring("drive").unwrap();
        assert_eq!(ring.len(), 28);
        assert_eq!(ring[27], Rgb::new(255, 87, 34));
        assert!(ring[..27].iter().all(|c| *c == LED_OFF));
        assert_eq!(reg.led_ring("nope"), None);
    }

    #[test]
    fn strips_use_fastled_literals() {
        let mut reg = ParameterRegistry::new(Arc::new(ManualClock::new(0)));
        reg.load_parameters(demo_parameters());
        let SyncMessage::LedUpdate { data, timestamp } = led_update(&reg, 42) else {
            panic!("expected led_update");
        };
        assert_eq!(timestamp, 42);
        assert_eq!(data.len(), 10);
        assert_eq!(data[0].param_id, "input-gain");
        assert_eq!(data[0].leds[0], "CRGB(51, 51, 51)");
    }

    #[test]
    fn parameter_update_clamps() {
        let msg = parameter_update("mix", 1.5, 0);
        assert!(matches!(msg, SyncMessage::ParameterUpdate { value, .. } if value == 1.0));
    }
}
