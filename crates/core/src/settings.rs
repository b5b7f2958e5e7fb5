use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::logger::Level;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub enabled_bots: Vec<String>,
    pub log_level: Level,
    pub motion: MotionSettings,
    pub control: ControlSettings,
    /// Window-relative `[x0, y0, x1, y1]` box holding hover/status text.
    pub hover_area: HoverArea,
}

/// Tuning for the human-motion synthesizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    /// Scales the default leg duration (`distance / 700` seconds).
    pub speed_multiplier: f64,
    pub curve_probability: f64,
    pub overshoot_probability: f64,
    pub wobble_px: f64,
    pub max_angle_deg: f64,
    pub max_step_px: f64,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            speed_multiplier: 1.0,
            curve_probability: 0.6,
            overshoot_probability: 0.3,
            wobble_px: 2.0,
            max_angle_deg: 30.0,
            max_step_px: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    pub poll_ms: u64,
    pub max_rest_secs: u64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self { poll_ms: 1000, max_rest_secs: 24 * 60 * 60 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HoverArea(pub [i32; 4]);

impl Default for HoverArea {
    fn default() -> Self {
        HoverArea([0, 0, 300, 24])
    }
}

impl Settings {
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            let _ = std::fs::write(path, json);
        }
    }
}
