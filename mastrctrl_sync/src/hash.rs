//! Structure hash shared by every peer on the channel.
//!
//! base64 over the compact JSON array of `{id, name, min, max, step, format}` in
//! that key order, one object per descriptor in list order. Numbers are printed
//! the way a browser's `JSON.stringify` prints them, so integral floats have no
//! fractional part (`1`, not `1.0`). Equality of this string is the only test for
//! "same structure".

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Serialize, Serializer};

/// Borrowed view of the stable subset of one descriptor.
#[derive(Serialize)]
pub struct StableFields<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub min: JsNumber,
    pub max: JsNumber,
    pub step: JsNumber,
    pub format: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub struct JsNumber(pub f64);

impl Serialize for JsNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let v = self.0;
        if !v.is_finite() {
            // JSON.stringify turns NaN/Infinity into null.
            return serializer.serialize_none();
        }
        if v.fract() == 0.0 && v.abs() < 1e15 {
            serializer.serialize_i64(v as i64)
        } else {
            serializer.serialize_f64(v)
        }
    }
}

pub fn structure_hash<'a>(fields: impl IntoIterator<Item = StableFields<'a>>) -> String {
    let fields: Vec<StableFields<'a>> = fields.into_iter().collect();
    // Serializing plain strings and numbers into a Vec cannot fail.
    let json = serde_json::to_vec(&fields).unwrap_or_else(|_| b"[]".to_vec());
    STANDARD.encode(json)
}
