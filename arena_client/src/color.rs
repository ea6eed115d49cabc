//! Body colour parsing.
//!
//! Players type a colour once at startup. It is kept twice: as RGBA for local
//! use and as the string sent in every `pos` update.

/// Linear RGBA in `[0, 1]`.
pub type Rgba = [f32; 4];

pub const RED: Rgba = [1.0, 0.0, 0.0, 1.0];

/// Parses `#RRGGBB[AA]`, a colour name, or an `r g b` triple.
///
/// Triples are read as 0–255 when any component exceeds 1.5, otherwise as
/// 0–1. Anything unrecognised falls back to red.
pub fn parse_color_input(input: &str) -> (Rgba, String) {
    let s = input.trim();

    if s.starts_with('#') && (s.len() == 7 || s.len() == 9) {
        if let Some(rgba) = hex_to_rgba(s) {
            return (rgba, s.to_string());
        }
    }

    let lower = s.to_ascii_lowercase();
    let named = match lower.as_str() {
        "red" => Some(RED),
        "green" => Some([0.0, 1.0, 0.0, 1.0]),
        "blue" => Some([0.0, 0.0, 1.0, 1.0]),
        "white" => Some([1.0, 1.0, 1.0, 1.0]),
        _ => None,
    };
    if let Some(rgba) = named {
        return (rgba, lower);
    }

    let nums: Result<Vec<f32>, _> = s.split_whitespace().map(str::parse::<f32>).collect();
    if let Ok(nums) = nums {
        if nums.len() >= 3 && nums.iter().all(|n| n.is_finite()) {
            let scale = if nums.iter().any(|&n| n > 1.5) { 255.0 } else { 1.0 };
            let (r, g, b) = (nums[0] / scale, nums[1] / scale, nums[2] / scale);
            return ([r, g, b, 1.0], format!("rgb({r:.2},{g:.2},{b:.2})"));
        }
    }

    (RED, "red".to_string())
}

/// Decodes the RGB part of `#RRGGBB...`; alpha is always opaque.
pub fn hex_to_rgba(s: &str) -> Option<Rgba> {
    let hex = s.strip_prefix('#')?;
    if hex.len() < 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok().map(|v| f32::from(v) / 255.0);
    Some([channel(0)?, channel(2)?, channel(4)?, 1.0])
}
