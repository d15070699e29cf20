use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Descriptor shape as it travels inside `parameter_structure_sync`.
///
/// Everything except `id` and `name` is optional on the way in; receivers fill
/// the gaps with their own defaults.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WireParameter {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgb_color: Option<Rgb>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValueUpdate {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgb_color: Option<Rgb>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColorUpdate {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgb_color: Option<Rgb>,
}

/// One knob ring rendered as FastLED `CRGB(r, g, b)` literals.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LedStrip {
    pub param_id: String,
    pub leds: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum SyncMessage {
    ParameterStructureSync {
        structure_hash: String,
        parameters: Vec<WireParameter>,
        #[serde(default)]
        timestamp: u64,
    },
    ParameterValueSync {
        updates: Vec<ValueUpdate>,
        #[serde(default)]
        timestamp: u64,
    },
    ParameterColorSync {
        updates: Vec<ColorUpdate>,
        #[serde(default)]
        timestamp: u64,
    },
    RequestParameterState {
        #[serde(default)]
        timestamp: u64,
    },
    /// Legacy single-field command for the hardware bridge.
    ParameterUpdate {
        parameter: String,
        value: f64,
        #[serde(default)]
        timestamp: u64,
    },
    LedUpdate {
        data: Vec<LedStrip>,
        #[serde(default)]
        timestamp: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    StructureSync,
    ValueSync,
    ColorSync,
    RequestState,
    ParameterUpdate,
    LedUpdate,
}

impl MessageKind {
    pub const ALL: [MessageKind; 6] = [
        MessageKind::StructureSync,
        MessageKind::ValueSync,
        MessageKind::ColorSync,
        MessageKind::RequestState,
        MessageKind::ParameterUpdate,
        MessageKind::LedUpdate,
    ];

    /// Wire value of the `type` field.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::StructureSync => "parameter_structure_sync",
            MessageKind::ValueSync => "parameter_value_sync",
            MessageKind::ColorSync => "parameter_color_sync",
            MessageKind::RequestState => "request_parameter_state",
            MessageKind::ParameterUpdate => "parameter_update",
            MessageKind::LedUpdate => "led_update",
        }
    }

    pub fn from_type(ty: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == ty)
    }
}

impl SyncMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            SyncMessage::ParameterStructureSync { .. } => MessageKind::StructureSync,
            SyncMessage::ParameterValueSync { .. } => MessageKind::ValueSync,
            SyncMessage::ParameterColorSync { .. } => MessageKind::ColorSync,
            SyncMessage::RequestParameterState { .. } => MessageKind::RequestState,
            SyncMessage::ParameterUpdate { .. } => MessageKind::ParameterUpdate,
            SyncMessage::LedUpdate { .. } => MessageKind::LedUpdate,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            SyncMessage::ParameterStructureSync { timestamp, .. }
            | SyncMessage::ParameterValueSync { timestamp, .. }
            | SyncMessage::ParameterColorSync { timestamp, .. }
            | SyncMessage::RequestParameterState { timestamp }
            | SyncMessage::ParameterUpdate { timestamp, .. }
            | SyncMessage::LedUpdate { timestamp, .. } => *timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_sync_uses_snake_case_envelope_and_camel_case_descriptors() {
        let msg = SyncMessage::ParameterStructureSync {
            structure_hash: "W10=".to_string(),
            parameters: vec![WireParameter {
                id: "drive".to_string(),
                name: "Drive".to_string(),
                default_value: Some(0.0),
                rgb_color: Some(Rgb::new(255, 87, 34)),
                led_count: Some(28),
                ..WireParameter::default()
            }],
            timestamp: 7,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "parameter_structure_sync");
        assert_eq!(json["structure_hash"], "W10=");
        let p = &json["parameters"][0];
        assert_eq!(p["defaultValue"], 0.0);
        assert_eq!(p["rgbColor"]["g"], 87);
        assert_eq!(p["ledCount"], 28);
        assert!(p.get("min").is_none(), "unset fields are omitted");
    }

    #[test]
    fn sparse_value_sync_from_a_browser_client_decodes() {
        let raw = r#"{"type":"parameter_value_sync","updates":[{"id":"mix","value":0.25,"text":"25%","rgbColor":{"r":255,"g":152,"b":0}}],"timestamp":1720000000000}"#;
        let msg: SyncMessage = serde_json::from_str(raw).unwrap();
        let SyncMessage::ParameterValueSync { updates, timestamp } = msg else {
            panic!("wrong variant");
        };
        assert_eq!(timestamp, 1_720_000_000_000);
        assert_eq!(updates[0].value, Some(0.25));
        assert_eq!(updates[0].rgb_color, Some(Rgb::new(255, 152, 0)));
    }

    #[test]
    fn missing_timestamp_defaults_to_zero() {
        let msg: SyncMessage = serde_json::from_str(r#"{"type":"request_parameter_state"}"#).unwrap();
        assert_eq!(msg.kind(), MessageKind::RequestState);
        assert_eq!(msg.timestamp(), 0);
    }

    #[test]
    fn kind_names_match_the_wire_tag() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::from_type(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::from_type("vu_meter"), None);
    }
}
