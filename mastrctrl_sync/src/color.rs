use mastrctrl_protocol::Rgb;

/// Parses `#rrggbb` or `rrggbb` (case-insensitive).
pub fn hex_to_rgb(hex: &str) -> Option<Rgb> {
    let digits = hex.trim().trim_start_matches('#');
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
    Some(Rgb::new(channel(0)?, channel(2)?, channel(4)?))
}

pub fn rgb_to_hex(rgb: Rgb) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb.r, rgb.g, rgb.b)
}

/// Canonical `(hex, rgb)` pair. Hex wins when both are supplied; an unparseable
/// hex keeps its text and maps to black.
pub fn resolve(color: Option<&str>, rgb: Option<Rgb>) -> Option<(String, Rgb)> {
    match (color, rgb) {
        (Some(hex), _) => {
            let rgb = hex_to_rgb(hex).unwrap_or_default();
            Some((normalize_hex(hex), rgb))
        }
        (None, Some(rgb)) => Some((rgb_to_hex(rgb), rgb)),
        (None, None) => None,
    }
}

fn normalize_hex(hex: &str) -> String {
    let hex = hex.trim();
    if hex.starts_with('#') {
        hex.to_string()
    } else {
        format!("#{hex}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_and_without_hash() {
        assert_eq!(hex_to_rgb("#4CAF50"), Some(Rgb::new(76, 175, 80)));
        assert_eq!(hex_to_rgb("ff5722"), Some(Rgb::new(255, 87, 34)));
        assert_eq!(hex_to_rgb("#fff"), None);
        assert_eq!(hex_to_rgb("#zzzzzz"), None);
    }

    #[test]
    fn rgb_only_is_stored_as_lowercase_hex() {
        let (hex, rgb) = resolve(None, Some(Rgb::new(0, 188, 212))).unwrap();
        assert_eq!(hex, "#00bcd4");
        assert_eq!(rgb, Rgb::new(0, 188, 212));
    }

    #[test]
    fn hex_takes_precedence_over_rgb() {
        let (hex, rgb) = resolve(Some("#E91E63"), Some(Rgb::new(1, 2, 3))).unwrap();
        assert_eq!(hex, "#E91E63");
        assert_eq!(rgb, Rgb::new(233, 30, 99));
    }
}
