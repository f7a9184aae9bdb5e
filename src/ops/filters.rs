// ============================================================================
// IMAGE FILTERS - the filter service boundary and a CPU implementation
// ============================================================================

use std::collections::BTreeMap;

use image::{GrayImage, Rgba, RgbaImage, imageops};

use crate::blend::{quantize, to_unit};
use crate::canvas::RasterBuffer;
use crate::error::{EngineError, Result};

/// A named effect and its numeric parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EffectRequest {
    pub name: String,
    pub params: BTreeMap<String, f32>,
}

impl EffectRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), params: BTreeMap::new() }
    }

    pub fn with(mut self, key: impl Into<String>, value: f32) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Parameter value, `default` when absent. Non-finite values are rejected.
    pub fn param(&self, key: &str, default: f32) -> Result<f32> {
        match self.params.get(key) {
            None => Ok(default),
            Some(v) if v.is_finite() => Ok(*v),
            Some(_) => Err(EngineError::InvalidEffectParam {
                effect: self.name.clone(),
                param: key.to_string(),
            }),
        }
    }
}

/// Turns a buffer into a new, filtered buffer. Implementations never see
/// live layer data, only copies.
pub trait FilterService: Send + Sync {
    fn apply(&self, input: &RasterBuffer, request: &EffectRequest) -> Result<RasterBuffer>;

    /// Names accepted by `apply`.
    fn effects(&self) -> &'static [&'static str];
}

/// Reference filters built on `image::imageops`.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuFilters;

impl CpuFilters {
    pub const EFFECTS: &'static [&'static str] =
        &["blur", "sharpen", "grayscale", "sepia", "invert", "brightness", "contrast"];
}

impl FilterService for CpuFilters {
    fn apply(&self, input: &RasterBuffer, request: &EffectRequest) -> Result<RasterBuffer> {
        let src = input.as_image();
        let out: RgbaImage = match request.name.to_ascii_lowercase().as_str() {
            "blur" => {
                let sigma = request.param("sigma", 2.0)?;
                if sigma <= 0.0 { src.clone() } else { imageops::blur(src, sigma) }
            }
            "sharpen" => {
                let sigma = request.param("sigma", 1.0)?;
                let threshold = request.param("threshold", 0.0)?;
                imageops::unsharpen(src, sigma.max(0.1), threshold as i32)
            }
            "grayscale" => map_pixels(src, |p| {
                let l = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
                let l = l.round().clamp(0.0, 255.0) as u8;
                Rgba([l, l, l, p[3]])
            }),
            "sepia" => map_pixels(src, |p| {
                let (r, g, b) = (p[0] as f32, p[1] as f32, p[2] as f32);
                let ch = |v: f32| v.round().clamp(0.0, 255.0) as u8;
                Rgba([
                    ch(0.393 * r + 0.769 * g + 0.189 * b),
                    ch(0.349 * r + 0.686 * g + 0.168 * b),
                    ch(0.272 * r + 0.534 * g + 0.131 * b),
                    p[3],
                ])
            }),
            "invert" => map_pixels(src, |p| Rgba([255 - p[0], 255 - p[1], 255 - p[2], p[3]])),
            "brightness" => {
                let amount = request.param("amount", 0.0)?;
                imageops::brighten(src, amount.clamp(-255.0, 255.0) as i32)
            }
            "contrast" => {
                let amount = request.param("amount", 0.0)?;
                imageops::contrast(src, amount.clamp(-100.0, 100.0))
            }
            _ => return Err(EngineError::UnknownEffect(request.name.clone())),
        };
        Ok(RasterBuffer::from_image(out))
    }

    fn effects(&self) -> &'static [&'static str] {
        Self::EFFECTS
    }
}

fn map_pixels(src: &RgbaImage, f: impl Fn(Rgba<u8>) -> Rgba<u8>) -> RgbaImage {
    let mut out = src.clone();
    for p in out.pixels_mut() {
        *p = f(*p);
    }
    out
}

/// Blend `filtered` back over `original` by the selection value. Pixels with
/// selection 0 (or outside it) keep their original value.
pub fn apply_selection(original: &RasterBuffer, filtered: &RasterBuffer, selection: &GrayImage) -> Result<RasterBuffer> {
    let mut out = original.try_clone()?;
    let (w, h) = original.dimensions();
    for y in 0..h.min(selection.height()) {
        for x in 0..w.min(selection.width()) {
            let m = selection.get_pixel(x, y).0[0];
            if m == 0 {
                continue;
            }
            let Some(f) = filtered.get(x, y) else { continue };
            if m == 255 {
                out.put(x, y, f);
                continue;
            }
            let Some(o) = original.get(x, y) else { continue };
            let t = to_unit(m);
            let mut px = [0u8; 4];
            for c in 0..4 {
                px[c] = quantize(to_unit(o[c]) * (1.0 - t) + to_unit(f[c]) * t);
            }
            out.put(x, y, Rgba(px));
        }
    }
    Ok(out)
}

/// Run `service` and shape its output for a layer: resized to the input's
/// dimensions (pad/crop at the origin) and restricted to `selection`.
pub fn run_filter(
    service: &dyn FilterService,
    input: &RasterBuffer,
    request: &EffectRequest,
    selection: Option<&GrayImage>,
) -> Result<RasterBuffer> {
    let mut out = service.apply(input, request)?;
    if out.dimensions() != input.dimensions() {
        log::warn!(
            "effect '{}' returned {}x{} for a {}x{} input; conforming",
            request.name,
            out.width(),
            out.height(),
            input.width(),
            input.height()
        );
        out = out.conformed(input.width(), input.height())?;
    }
    match selection {
        Some(sel) => apply_selection(input, &out, sel),
        None => Ok(out),
    }
}
