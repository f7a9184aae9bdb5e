//! Flattens a [`LayerStack`] into one canvas-sized buffer.
//!
//! Composition runs in normalized floats per row and is quantized once per
//! pixel at the end, so deep stacks do not band.

use crate::blend::{self, BlendMode, PixelF, TRANSPARENT_F};
use crate::canvas::{Layer, LayerStack, RasterBuffer};
use crate::error::Result;

/// Layers at or below this opacity are skipped.
pub const OPACITY_EPSILON: f32 = 0.001;

/// Non-fatal conditions met while compositing.
#[derive(Clone, Debug, PartialEq)]
pub enum CompositeWarning {
    /// The layer's blend mode is not implemented; it was drawn as normal.
    UnsupportedBlendMode { layer_index: usize, layer_name: String },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompositeReport {
    pub warnings: Vec<CompositeWarning>,
}

impl CompositeReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn log(&self) {
        for w in &self.warnings {
            match w {
                CompositeWarning::UnsupportedBlendMode { layer_index, layer_name } => {
                    log::warn!(
                        "layer {} '{}' uses an unsupported blend mode; composited as normal",
                        layer_index,
                        layer_name
                    );
                }
            }
        }
    }
}

/// One input to the compositor: a layer's settings plus the pixels to use
/// for it (normally its own, or a preview substitute).
struct Source<'a> {
    index: usize,
    layer: &'a Layer,
    pixels: &'a RasterBuffer,
}

/// Composite the whole stack.
pub fn render(stack: &LayerStack) -> Result<RasterBuffer> {
    render_range(stack, 0, None)
}

/// Composite layers `start..=end` (`end` defaults to the top layer). Both
/// bounds are clamped into the stack.
pub fn render_range(stack: &LayerStack, start: usize, end: Option<usize>) -> Result<RasterBuffer> {
    let (out, report) = render_with_report(stack, start, end)?;
    report.log();
    Ok(out)
}

/// Like [`render_range`] but hands back the warnings instead of logging them.
pub fn render_with_report(
    stack: &LayerStack,
    start: usize,
    end: Option<usize>,
) -> Result<(RasterBuffer, CompositeReport)> {
    let sources = collect_sources(stack, start, end, None);
    composite_sources(stack.width(), stack.height(), &sources, true)
}

/// Composite the stack with `pixels` standing in for layer `index`. The live
/// layer is not touched. An invalid `index` renders the stack unchanged.
pub fn render_with_override(stack: &LayerStack, index: usize, pixels: &RasterBuffer) -> Result<RasterBuffer> {
    let sources = collect_sources(stack, 0, None, Some((index, pixels)));
    let (out, report) = composite_sources(stack.width(), stack.height(), &sources, true)?;
    report.log();
    Ok(out)
}

/// Composite an explicit list of layers bottom-to-top onto a transparent
/// `width x height` buffer, honoring each layer's own visibility, opacity,
/// mask and blend mode. Always takes the general path.
pub fn composite_layers(width: u32, height: u32, layers: &[&Layer]) -> Result<(RasterBuffer, CompositeReport)> {
    let sources: Vec<Source> = layers
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, l)| l.contributes())
        .map(|(index, layer)| Source { index, layer, pixels: layer.pixels() })
        .collect();
    composite_sources(width, height, &sources, false)
}

fn collect_sources<'a>(
    stack: &'a LayerStack,
    start: usize,
    end: Option<usize>,
    replace: Option<(usize, &'a RasterBuffer)>,
) -> Vec<Source<'a>> {
    if stack.is_empty() {
        return Vec::new();
    }
    let last = stack.len() - 1;
    let start = start.min(last);
    let end = end.unwrap_or(last).clamp(start, last);
    stack.layers()[start..=end]
        .iter()
        .enumerate()
        .map(|(i, layer)| (start + i, layer))
        .filter(|(_, layer)| layer.contributes())
        .map(|(index, layer)| {
            let pixels = match replace {
                Some((r, px)) if r == index => px,
                _ => layer.pixels(),
            };
            Source { index, layer, pixels }
        })
        .collect()
}

fn composite_sources(
    width: u32,
    height: u32,
    sources: &[Source],
    allow_fast_path: bool,
) -> Result<(RasterBuffer, CompositeReport)> {
    let mut report = CompositeReport::default();
    for s in sources {
        if !s.layer.blend_mode.is_supported() {
            report.warnings.push(CompositeWarning::UnsupportedBlendMode {
                layer_index: s.index,
                layer_name: s.layer.name.clone(),
            });
        }
    }

    if sources.is_empty() {
        return Ok((RasterBuffer::new(width, height)?, report));
    }

    if allow_fast_path
        && let [only] = sources
        && only.layer.opacity() >= 1.0
        && only.layer.blend_mode == BlendMode::Normal
        && !only.layer.has_mask()
    {
        return Ok((only.pixels.conformed(width, height)?, report));
    }

    let mut out = RasterBuffer::new(width, height)?;
    let mut acc: Vec<PixelF> = vec![TRANSPARENT_F; width as usize];
    for (y, row) in out.rows_mut().enumerate() {
        let y = y as i64;
        acc.fill(TRANSPARENT_F);
        for s in sources {
            let opacity = s.layer.opacity();
            let mode = s.layer.blend_mode;
            let mask = s.layer.mask();
            for (x, base) in acc.iter_mut().enumerate() {
                let x = x as i64;
                let px = s.pixels.sample(x, y);
                if px[3] == 0 {
                    continue;
                }
                let mask_value = match mask {
                    Some(m) if x < m.width() as i64 && y < m.height() as i64 => {
                        blend::to_unit(m.get_pixel(x as u32, y as u32).0[0])
                    }
                    Some(_) => 0.0,
                    None => 1.0,
                };
                let ta = blend::to_unit(px[3]) * opacity * mask_value;
                let top = [blend::to_unit(px[0]), blend::to_unit(px[1]), blend::to_unit(px[2])];
                *base = blend::composite_over(*base, top, ta, mode);
            }
        }
        for (dst, src) in row.chunks_exact_mut(4).zip(acc.iter()) {
            for c in 0..4 {
                dst[c] = blend::quantize(src[c]);
            }
        }
    }
    Ok((out, report))
}
