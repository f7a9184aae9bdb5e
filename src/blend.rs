//! Blend modes and the per-channel math behind them.
//!
//! All arithmetic is done on normalized `f32` channels in `[0, 1]`; values are
//! only quantized back to 8 bits by [`quantize`].

use serde::{Deserialize, Serialize};

// ============================================================================
// BLEND MODE
// ============================================================================

/// Blend mode of a layer.
///
/// `Unknown` is the landing spot for names that [`BlendMode::parse`] does not
/// recognise (legacy documents, modes such as hue or soft light that the
/// engine does not implement). It composites exactly like `Normal`, and the
/// compositor reports it as a warning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Darken,
    Lighten,
    Overlay,
    Unknown,
}

impl BlendMode {
    /// Returns all supported blend modes for UI display
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Darken,
            BlendMode::Lighten,
            BlendMode::Overlay,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::Overlay => "Overlay",
            BlendMode::Unknown => "Unknown",
        }
    }

    /// Map a stored or user supplied mode name onto the enum.
    /// Matching ignores case, spaces, dashes and underscores.
    pub fn parse(name: &str) -> BlendMode {
        let key: String = name
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "normal" => BlendMode::Normal,
            "multiply" => BlendMode::Multiply,
            "screen" => BlendMode::Screen,
            "darken" => BlendMode::Darken,
            "lighten" => BlendMode::Lighten,
            "overlay" => BlendMode::Overlay,
            _ => {
                log::warn!("unsupported blend mode `{}`, treating it as normal", name);
                BlendMode::Unknown
            }
        }
    }

    /// `true` for every mode the compositor implements natively.
    pub fn is_supported(&self) -> bool {
        !matches!(self, BlendMode::Unknown)
    }

    /// Blend one normalized channel.
    #[inline]
    pub fn blend_channel(self, base: f32, top: f32) -> f32 {
        match self {
            BlendMode::Normal | BlendMode::Unknown => top,
            BlendMode::Multiply => base * top,
            BlendMode::Screen => 1.0 - (1.0 - base) * (1.0 - top),
            BlendMode::Darken => base.min(top),
            BlendMode::Lighten => base.max(top),
            BlendMode::Overlay => overlay_channel(base, top),
        }
    }
}

fn overlay_channel(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

// ============================================================================
// PIXEL MATH
// ============================================================================

/// Normalized RGBA pixel used while compositing.
pub type PixelF = [f32; 4];

pub const TRANSPARENT_F: PixelF = [0.0, 0.0, 0.0, 0.0];

/// Composite `top` over `base` with an already combined coverage `top_alpha`
/// (`layer alpha * opacity * mask`).
///
/// color: `base * (1 - ta) + blended * ta`, alpha: `ba + ta * (1 - ba)`.
#[inline]
pub fn composite_over(base: PixelF, top: [f32; 3], top_alpha: f32, mode: BlendMode) -> PixelF {
    let ta = top_alpha.clamp(0.0, 1.0);
    if ta <= 0.0 {
        return base;
    }
    let inv = 1.0 - ta;
    let mut out = [0.0; 4];
    for c in 0..3 {
        let blended = mode.blend_channel(base[c], top[c]);
        out[c] = (base[c] * inv + blended * ta).clamp(0.0, 1.0);
    }
    out[3] = (base[3] + ta * (1.0 - base[3])).clamp(0.0, 1.0);
    out
}

/// `round(x * 255)` clamped into `[0, 255]`.
#[inline]
pub fn quantize(x: f32) -> u8 {
    if x.is_nan() {
        return 0;
    }
    (x * 255.0).round().clamp(0.0, 255.0) as u8
}

#[inline]
pub fn to_unit(v: u8) -> f32 {
    v as f32 / 255.0
}
