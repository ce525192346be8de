//! G-code line helpers shared by the metadata scanner and the job controller.

use regex::Regex;
use std::sync::LazyLock;

static NUMBERED_LAYER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:layer(?:\s+number|\s*#)?|layer num/total_layer_count)\s*[:=]?\s*(-?\d+)")
        .expect("layer marker pattern compiles")
});

static Z_HEIGHT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:layer_z|z_height|z)\s*[:=]|move to z\s*[:=]?)\s*(\d+(?:\.\d+)?)")
        .expect("z height pattern compiles")
});

/// A layer boundary found in a comment line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LayerMarker {
    /// Explicit layer number (`;LAYER:12`, `; layer 12, Z = 2.4`).
    Number(u32),
    /// Only a Z height is given (`;Z:2.4`, `;LAYER_Z=2.4`).
    ZHeight(f64),
    /// A layer change with no number (`;LAYER_CHANGE`).
    Change,
}

/// Text of a comment line without the leading `;` run, case preserved.
pub(crate) fn comment_text(line: &str) -> Option<&str> {
    let body = line.trim_start().strip_prefix(';')?;
    Some(body.trim_start_matches(';').trim())
}

/// Lowercased [`comment_text`], for keyword matching.
pub(crate) fn comment_body(line: &str) -> Option<String> {
    comment_text(line).map(str::to_ascii_lowercase)
}

pub fn parse_layer_marker(line: &str) -> Option<LayerMarker> {
    let body = comment_body(line)?;
    if let Some(caps) = NUMBERED_LAYER.captures(&body) {
        return caps[1]
            .parse::<i64>()
            .ok()
            .filter(|n| *n >= 0)
            .and_then(|n| u32::try_from(n).ok())
            .map(LayerMarker::Number);
    }
    if let Some(caps) = Z_HEIGHT.captures(&body) {
        return caps[1].parse::<f64>().ok().map(LayerMarker::ZHeight);
    }
    match body.as_str() {
        "layer_change" | "change_layer" | "layer change" | "after_layer_change" => {
            Some(LayerMarker::Change)
        }
        _ => None,
    }
}

/// Nearest layer index for a Z height at a fixed layer height.
pub fn estimate_layer_from_z(z: f64, layer_height: f64) -> u32 {
    if layer_height <= 0.0 || !z.is_finite() || z <= 0.0 {
        return 0;
    }
    (z / layer_height).round().min(u32::MAX as f64) as u32
}

/// Splits a command word like `G01` into `('G', 1)`.
fn command_code(token: &str) -> Option<(char, u32)> {
    let mut chars = token.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let number = chars.as_str().parse::<u32>().ok()?;
    Some((letter, number))
}

fn axis_value(tokens: &[&str], axis: char) -> Option<f64> {
    tokens.iter().find_map(|token| {
        let mut chars = token.chars();
        let first = chars.next()?;
        if first.eq_ignore_ascii_case(&axis) {
            chars.as_str().parse::<f64>().ok()
        } else {
            None
        }
    })
}

/// Tracks filament pushed by the extruder across moves.
///
/// Only forward motion past the furthest point reached counts, so a
/// retract followed by the matching unretract adds nothing.
#[derive(Debug, Clone, Default)]
pub struct ExtrusionTracker {
    relative: bool,
    position: f64,
    high_water: f64,
    total: f64,
}

impl ExtrusionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line; returns the newly extruded length in mm.
    pub fn observe(&mut self, line: &str) -> f64 {
        let code = line.split(';').next().unwrap_or("");
        let tokens: Vec<&str> = code.split_whitespace().collect();
        let Some(&first) = tokens.first() else {
            return 0.0;
        };
        match command_code(first) {
            Some(('M', 82)) | Some(('G', 90)) => self.relative = false,
            Some(('M', 83)) | Some(('G', 91)) => self.relative = true,
            Some(('G', 92)) => {
                if let Some(e) = axis_value(&tokens[1..], 'E') {
                    self.position = e;
                    self.high_water = e;
                }
            }
            Some(('G', 0..=3)) => {
                if let Some(e) = axis_value(&tokens[1..], 'E') {
                    let target = if self.relative { self.position + e } else { e };
                    self.position = target;
                    if target > self.high_water {
                        let delta = target - self.high_water;
                        self.high_water = target;
                        self.total += delta;
                        return delta;
                    }
                }
            }
            _ => {}
        }
        0.0
    }

    pub fn total(&self) -> f64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_marker_dialects() {
        assert_eq!(parse_layer_marker(";LAYER:12"), Some(LayerMarker::Number(12)));
        assert_eq!(parse_layer_marker("; layer 7, Z = 1.4"), Some(LayerMarker::Number(7)));
        assert_eq!(parse_layer_marker(";LAYER:-1"), None);
        assert_eq!(
            parse_layer_marker("; layer num/total_layer_count: 3/120"),
            Some(LayerMarker::Number(3))
        );
        assert_eq!(parse_layer_marker(";Z:0.6"), Some(LayerMarker::ZHeight(0.6)));
        assert_eq!(parse_layer_marker(";LAYER_Z=1.2"), Some(LayerMarker::ZHeight(1.2)));
        assert_eq!(parse_layer_marker(";LAYER_CHANGE"), Some(LayerMarker::Change));
    }

    #[test]
    fn test_non_markers() {
        assert_eq!(parse_layer_marker("G1 Z0.2"), None);
        assert_eq!(parse_layer_marker(";layer_count: 40"), None);
        assert_eq!(parse_layer_marker(";TIME_ELAPSED:12.5"), None);
        assert_eq!(parse_layer_marker(";Zebra"), None);
    }

    #[test]
    fn test_estimate_layer_from_z() {
        assert_eq!(estimate_layer_from_z(0.6, 0.2), 3);
        assert_eq!(estimate_layer_from_z(0.59, 0.2), 3);
        assert_eq!(estimate_layer_from_z(-1.0, 0.2), 0);
    }

    #[test]
    fn test_absolute_extrusion_ignores_retracts() {
        let mut tracker = ExtrusionTracker::new();
        assert_eq!(tracker.observe("G1 X10 E5"), 5.0);
        assert_eq!(tracker.observe("G1 E4 ; retract"), 0.0);
        assert_eq!(tracker.observe("G1 E5"), 0.0);
        assert_eq!(tracker.observe("G1 X20 E7.5"), 2.5);
        tracker.observe("G92 E0");
        assert_eq!(tracker.observe("G1 X30 E1"), 1.0);
        assert_eq!(tracker.total(), 8.5);
    }

    #[test]
    fn test_relative_extrusion() {
        let mut tracker = ExtrusionTracker::new();
        tracker.observe("M83");
        tracker.observe("G1 X1 E2");
        tracker.observe("G1 E-0.8");
        tracker.observe("G1 E0.8");
        tracker.observe("G1 X2 E1");
        assert!((tracker.total() - 3.0).abs() < 1e-9);
    }
}
