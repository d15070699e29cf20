//! Name-keyed parameter categories: display text rules and default colors.
//!
//! A descriptor's category is resolved once from its name when the descriptor is
//! created; text and preset lookups afterwards go through the category only.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamCategory {
    InputGain,
    Drive,
    Tone,
    OutputLevel,
    Mix,
    Attack,
    Release,
    Threshold,
    Ratio,
    Knee,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextRule {
    Percentage,
    Milliseconds { scale: f64 },
    DecibelOffset { center: f64, range: f64 },
    Discrete(&'static [&'static str]),
}

const RATIOS: &[&str] = &["1:1", "2:1", "4:1", "8:1", "16:1", "∞:1"];
const KNEES: &[&str] = &["Hard", "Soft", "Medium"];

pub const FALLBACK_COLOR: &str = "#4CAF50";

struct CategoryDef {
    name: &'static str,
    category: ParamCategory,
    rule: TextRule,
    color: &'static str,
}

const CATEGORIES: &[CategoryDef] = &[
    CategoryDef { name: "input gain", category: ParamCategory::InputGain, rule: TextRule::Percentage, color: "#4CAF50" },
    CategoryDef { name: "drive", category: ParamCategory::Drive, rule: TextRule::Percentage, color: "#FF5722" },
    CategoryDef { name: "tone", category: ParamCategory::Tone, rule: TextRule::Percentage, color: "#2196F3" },
    CategoryDef { name: "output level", category: ParamCategory::OutputLevel, rule: TextRule::Percentage, color: "#9C27B0" },
    CategoryDef { name: "mix", category: ParamCategory::Mix, rule: TextRule::Percentage, color: "#FF9800" },
    CategoryDef { name: "attack", category: ParamCategory::Attack, rule: TextRule::Milliseconds { scale: 100.0 }, color: "#00BCD4" },
    CategoryDef { name: "release", category: ParamCategory::Release, rule: TextRule::Milliseconds { scale: 200.0 }, color: "#3F51B5" },
    CategoryDef { name: "threshold", category: ParamCategory::Threshold, rule: TextRule::DecibelOffset { center: 0.5, range: 48.0 }, color: "#E91E63" },
    CategoryDef { name: "ratio", category: ParamCategory::Ratio, rule: TextRule::Discrete(RATIOS), color: "#795548" },
    CategoryDef { name: "knee", category: ParamCategory::Knee, rule: TextRule::Discrete(KNEES), color: "#607D8B" },
];

impl ParamCategory {
    pub fn from_name(name: &str) -> Self {
        let key = name.trim().to_ascii_lowercase();
        CATEGORIES
            .iter()
            .find(|def| def.name == key)
            .map(|def| def.category)
            .unwrap_or(ParamCategory::Other)
    }

    fn def(self) -> Option<&'static CategoryDef> {
        CATEGORIES.iter().find(|def| def.category == self)
    }

    pub fn text_rule(self) -> TextRule {
        self.def().map(|d| d.rule).unwrap_or(TextRule::Percentage)
    }

    pub fn preset_color(self) -> &'static str {
        self.def().map(|d| d.color).unwrap_or(FALLBACK_COLOR)
    }

    pub fn format_value(self, value: f64) -> String {
        self.text_rule().render(value)
    }
}

impl TextRule {
    pub fn render(self, value: f64) -> String {
        match self {
            TextRule::Percentage => format!("{}%", round_half_up(value * 100.0)),
            TextRule::Milliseconds { scale } => format!("{}ms", round_half_up(value * scale)),
            TextRule::DecibelOffset { center, range } => {
                format!("{}dB", round_half_up((value - center) * range))
            }
            TextRule::Discrete(labels) => {
                let last = labels.len().saturating_sub(1);
                let idx = (value.clamp(0.0, 1.0) * last as f64).floor() as usize;
                labels.get(idx.min(last)).copied().unwrap_or_default().to_string()
            }
        }
    }
}

/// Rounds .5 toward positive infinity, the way browser peers do.
fn round_half_up(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_case_insensitively() {
        assert_eq!(ParamCategory::from_name("Input Gain"), ParamCategory::InputGain);
        assert_eq!(ParamCategory::from_name("  RELEASE "), ParamCategory::Release);
        assert_eq!(ParamCategory::from_name("Bypass"), ParamCategory::Other);
    }

    #[test]
    fn text_rules_per_category() {
        assert_eq!(ParamCategory::Drive.format_value(0.3), "30%");
        assert_eq!(ParamCategory::Attack.format_value(0.2), "20ms");
        assert_eq!(ParamCategory::Release.format_value(0.4), "80ms");
        assert_eq!(ParamCategory::Threshold.format_value(0.25), "-12dB");
        assert_eq!(ParamCategory::Threshold.format_value(0.5), "0dB");
        assert_eq!(ParamCategory::Ratio.format_value(0.5), "4:1");
        assert_eq!(ParamCategory::Ratio.format_value(0.7), "8:1");
        assert_eq!(ParamCategory::Ratio.format_value(1.0), "∞:1");
        assert_eq!(ParamCategory::Knee.format_value(0.3), "Hard");
        assert_eq!(ParamCategory::Knee.format_value(0.5), "Soft");
        assert_eq!(ParamCategory::Other.format_value(0.555), "56%");
    }

    #[test]
    fn half_values_round_up_even_when_negative() {
        let rule = TextRule::DecibelOffset { center: 0.5, range: 10.0 };
        assert_eq!(rule.render(0.25), "-2dB");
        assert_eq!(rule.render(0.75), "3dB");
    }

    #[test]
    fn unknown_names_get_the_fallback_color() {
        assert_eq!(ParamCategory::Other.preset_color(), FALLBACK_COLOR);
        assert_eq!(ParamCategory::Knee.preset_color(), "#607D8B");
    }
}
