//! Color literal canonicalization for computed-style assertions.
//!
//! Every supported literal is reduced to `rgb(r, g, b)`. Comparison is exact
//! string equality of the reduced forms, so alpha and sub-pixel rendering
//! differences count as different colors.

use once_cell::sync::Lazy;
use regex::Regex;

static RGB_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^rgba?\(\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)").expect("static regex")
});

const NAMED_COLORS: &[(&str, (u8, u8, u8))] = &[
    ("red", (255, 0, 0)),
    ("blue", (0, 0, 255)),
    ("green", (0, 128, 0)),
    ("white", (255, 255, 255)),
    ("black", (0, 0, 0)),
    ("yellow", (255, 255, 0)),
    ("gray", (128, 128, 128)),
    ("grey", (128, 128, 128)),
    ("orange", (255, 165, 0)),
    ("purple", (128, 0, 128)),
    ("pink", (255, 192, 203)),
    ("brown", (165, 42, 42)),
    ("cyan", (0, 255, 255)),
    ("magenta", (255, 0, 255)),
    ("lime", (0, 255, 0)),
    ("navy", (0, 0, 128)),
    ("teal", (0, 128, 128)),
    ("silver", (192, 192, 192)),
    ("gold", (255, 215, 0)),
];

fn rgb(r: impl std::fmt::Display, g: impl std::fmt::Display, b: impl std::fmt::Display) -> String {
    format!("rgb({}, {}, {})", r, g, b)
}

/// Reduce a named, hex, or `rgb()/rgba()` literal to `rgb(r, g, b)`.
///
/// Unsupported input is returned unchanged.
pub fn normalize_color(literal: &str) -> String {
    let trimmed = literal.trim().to_lowercase();

    if let Some((_, (r, g, b))) = NAMED_COLORS.iter().find(|(name, _)| *name == trimmed) {
        return rgb(r, g, b);
    }

    if let Some(hex) = trimmed.strip_prefix('#') {
        if let Some((r, g, b)) = parse_hex(hex) {
            return rgb(r, g, b);
        }
    }

    if let Some(caps) = RGB_FUNCTION.captures(&trimmed) {
        return rgb(&caps[1], &caps[2], &caps[3]);
    }

    literal.to_string()
}

/// Whether two literals denote the same color after normalization
pub fn colors_match(expected: &str, actual: &str) -> bool {
    normalize_color(expected) == normalize_color(actual)
}

fn parse_hex(hex: &str) -> Option<(u8, u8, u8)> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 | 8 => hex.to_string(),
        _ => return None,
    };
    let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}
