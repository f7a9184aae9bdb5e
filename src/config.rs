//! Engine-level settings.
//!
//! Stored as plain `key=value` lines, one per setting. Reading and writing the
//! file is the host's job; this module only converts between text and
//! [`EngineConfig`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_undo_steps: usize,
    /// History memory cap in megabytes. 0 disables the cap.
    pub max_history_memory_mb: usize,
    pub preview_debounce_ms: u64,
    pub default_brush_size: u32,
    pub default_hardness: f32,
    pub default_spacing: f32,
    pub default_fill_tolerance: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_undo_steps: 50,
            max_history_memory_mb: 100,
            preview_debounce_ms: 120,
            default_brush_size: 10,
            default_hardness: 0.8,
            default_spacing: 0.1,
            default_fill_tolerance: 32.0,
        }
    }
}

impl EngineConfig {
    /// Parse settings text. Unknown keys are skipped and malformed values keep
    /// their defaults.
    pub fn from_config_str(content: &str) -> Self {
        let mut s = Self::default();
        let d = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "max_undo_steps" => {
                    s.max_undo_steps = val.parse().unwrap_or(d.max_undo_steps).max(1);
                }
                "max_history_memory_mb" => {
                    s.max_history_memory_mb = val.parse().unwrap_or(d.max_history_memory_mb);
                }
                "preview_debounce_ms" => {
                    s.preview_debounce_ms = val.parse().unwrap_or(d.preview_debounce_ms);
                }
                "default_brush_size" => {
                    s.default_brush_size = val.parse().unwrap_or(d.default_brush_size).max(1);
                }
                "default_hardness" => {
                    s.default_hardness = parse_unit(val).unwrap_or(d.default_hardness);
                }
                "default_spacing" => {
                    s.default_spacing = val
                        .parse::<f32>()
                        .ok()
                        .filter(|v| v.is_finite() && *v > 0.0)
                        .unwrap_or(d.default_spacing);
                }
                "default_fill_tolerance" => {
                    s.default_fill_tolerance = val
                        .parse::<f32>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .map(|v| v.clamp(0.0, 255.0))
                        .unwrap_or(d.default_fill_tolerance);
                }
                _ => {
                    log::debug!("config: ignoring unknown key `{}`", key);
                }
            }
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("max_undo_steps={}\n", self.max_undo_steps));
        out.push_str(&format!("max_history_memory_mb={}\n", self.max_history_memory_mb));
        out.push_str(&format!("preview_debounce_ms={}\n", self.preview_debounce_ms));
        out.push_str(&format!("default_brush_size={}\n", self.default_brush_size));
        out.push_str(&format!("default_hardness={}\n", self.default_hardness));
        out.push_str(&format!("default_spacing={}\n", self.default_spacing));
        out.push_str(&format!("default_fill_tolerance={}\n", self.default_fill_tolerance));
        out
    }

    pub fn history_memory_bytes(&self) -> Option<usize> {
        if self.max_history_memory_mb == 0 {
            None
        } else {
            Some(self.max_history_memory_mb.saturating_mul(1024 * 1024))
        }
    }

    pub fn preview_debounce(&self) -> Duration {
        Duration::from_millis(self.preview_debounce_ms)
    }
}

fn parse_unit(val: &str) -> Option<f32> {
    val.parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 1.0))
}
