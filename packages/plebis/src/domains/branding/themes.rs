//! Predefined colour themes and WCAG contrast checks.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    /// `#RGB` or `#RRGGBB`
    pub static ref HEX_COLOR: Regex = Regex::new(r"^#([A-Fa-f0-9]{6}|[A-Fa-f0-9]{3})$").unwrap();
}

/// Minimum contrast against white for text colours (WCAG AA).
pub const MIN_CONTRAST_RATIO: f64 = 4.5;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeColors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_light: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_dark: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_light: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_dark: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct Theme {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// primary, primary light, primary dark, secondary, secondary light, secondary dark
    pub colors: [&'static str; 6],
}

impl Theme {
    pub fn colors(&self) -> ThemeColors {
        let [p, pl, pd, s, sl, sd] = self.colors.map(|c| Some(c.to_string()));
        ThemeColors {
            primary: p,
            primary_light: pl,
            primary_dark: pd,
            secondary: s,
            secondary_light: sl,
            secondary_dark: sd,
        }
    }
}

pub static THEMES: [Theme; 5] = [
    Theme {
        id: "default",
        name: "PlebisHub Default",
        description: "Original PlebisHub brand colors",
        colors: ["#612d62", "#8a4f98", "#4c244a", "#269283", "#14b8a6", "#0f766e"],
    },
    Theme {
        id: "ocean",
        name: "Ocean Blue",
        description: "Cool blue tones",
        colors: ["#1e40af", "#3b82f6", "#1e3a8a", "#0891b2", "#06b6d4", "#0e7490"],
    },
    Theme {
        id: "forest",
        name: "Forest Green",
        description: "Natural green palette",
        colors: ["#15803d", "#22c55e", "#14532d", "#0d9488", "#14b8a6", "#115e59"],
    },
    Theme {
        id: "sunset",
        name: "Sunset Orange",
        description: "Warm orange and red tones",
        colors: ["#c2410c", "#f97316", "#7c2d12", "#dc2626", "#ef4444", "#991b1b"],
    },
    Theme {
        id: "monochrome",
        name: "Monochrome",
        description: "Black and white",
        colors: ["#1a1a1a", "#404040", "#000000", "#666666", "#999999", "#333333"],
    },
];

pub fn theme(id: &str) -> Option<&'static Theme> {
    THEMES.iter().find(|t| t.id == id)
}

fn rgb(hex: &str) -> Option<[u8; 3]> {
    let digits = HEX_COLOR.captures(hex)?.get(1)?.as_str();
    let expanded: String = if digits.len() == 3 {
        digits.chars().flat_map(|c| [c, c]).collect()
    } else {
        digits.to_string()
    };
    let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

/// WCAG relative luminance of a hex colour.
pub fn relative_luminance(hex: &str) -> Option<f64> {
    let linear = |channel: u8| {
        let c = f64::from(channel) / 255.0;
        if c <= 0.03928 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        }
    };
    let [r, g, b] = rgb(hex)?;
    Some(0.2126 * linear(r) + 0.7152 * linear(g) + 0.0722 * linear(b))
}

/// `(lighter + 0.05) / (darker + 0.05)`, from 1 to 21.
pub fn contrast_ratio(a: &str, b: &str) -> Option<f64> {
    let (la, lb) = (relative_luminance(a)?, relative_luminance(b)?);
    let (lighter, darker) = if la >= lb { (la, lb) } else { (lb, la) };
    Some((lighter + 0.05) / (darker + 0.05))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 0.01
    }

    #[test]
    fn known_contrast_ratios() {
        assert!(close(contrast_ratio("#000000", "#ffffff").unwrap(), 21.0));
        assert!(close(contrast_ratio("#000", "#fff").unwrap(), 21.0));
        assert!(close(contrast_ratio("#ffffff", "#ffffff").unwrap(), 1.0));
        assert!(close(contrast_ratio("#612d62", "#ffffff").unwrap(), 10.19));
        assert!(close(contrast_ratio("#777777", "#ffffff").unwrap(), 4.48));
        assert!(close(contrast_ratio("#767676", "#ffffff").unwrap(), 4.54));
    }

    #[test]
    fn malformed_colours_have_no_luminance() {
        assert!(relative_luminance("612d62").is_none());
        assert!(relative_luminance("#12345").is_none());
        assert!(relative_luminance("#gggggg").is_none());
    }

    #[test]
    fn themes_by_id() {
        assert_eq!(theme("ocean").map(|t| t.name), Some("Ocean Blue"));
        assert!(theme("neon").is_none());
        let colors = theme("default").unwrap().colors();
        assert_eq!(colors.primary.as_deref(), Some("#612d62"));
        assert_eq!(colors.secondary_dark.as_deref(), Some("#0f766e"));
    }
}
