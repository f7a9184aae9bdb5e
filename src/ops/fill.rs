// ============================================================================
// FLOOD FILL - 4-connected, queue based, tolerance measured from the seed
// ============================================================================

use std::collections::VecDeque;

use image::{GrayImage, Rgba};

use crate::blend::{quantize, to_unit};
use crate::canvas::{RasterBuffer, try_gray};
use crate::error::Result;
use crate::ops::brush::DirtyRect;

/// Outcome of a fill. `filled == 0` means nothing changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FillResult {
    pub filled: usize,
    pub bounds: Option<DirtyRect>,
}

/// Whether `p` belongs to the region grown from `seed`.
///
/// Euclidean RGB distance and the alpha gap must both be within `tolerance`
/// (0..=255), so a tolerance of 0 means exact equality. Transparent pixels
/// are compared by their stored RGB like any other.
#[inline]
pub fn colors_match(seed: Rgba<u8>, p: Rgba<u8>, tolerance: f32) -> bool {
    let dr = seed[0] as f32 - p[0] as f32;
    let dg = seed[1] as f32 - p[1] as f32;
    let db = seed[2] as f32 - p[2] as f32;
    let da = (seed[3] as f32 - p[3] as f32).abs();
    (dr * dr + dg * dg + db * db).sqrt() <= tolerance && da <= tolerance
}

/// Fill the region connected to `(x, y)` with `fill`.
///
/// Seeds outside the buffer and seeds already equal to `fill` are no-ops.
/// With a selection, `fill` is blended in by the selection value and pixels
/// where it is 0 are not written. Only the visited-map allocation can fail.
pub fn flood_fill(
    target: &mut RasterBuffer,
    x: i64,
    y: i64,
    fill: Rgba<u8>,
    tolerance: f32,
    selection: Option<&GrayImage>,
) -> Result<FillResult> {
    if !target.in_bounds(x, y) {
        return Ok(FillResult::default());
    }
    let (sx, sy) = (x as u32, y as u32);
    let Some(seed) = target.get(sx, sy) else {
        return Ok(FillResult::default());
    };
    if seed == fill {
        return Ok(FillResult::default());
    }
    let tolerance = if tolerance.is_nan() { 0.0 } else { tolerance.clamp(0.0, 255.0) };

    let (w, h) = target.dimensions();
    // Region membership, decided against the untouched pixels.
    let mut visited = try_gray(w, h, 0)?;
    let mut region: Vec<(u32, u32)> = Vec::new();
    let mut queue = VecDeque::new();
    visited.put_pixel(sx, sy, image::Luma([1]));
    queue.push_back((sx, sy));

    while let Some((cx, cy)) = queue.pop_front() {
        region.push((cx, cy));
        let neighbors = [
            (cx.wrapping_sub(1), cy),
            (cx + 1, cy),
            (cx, cy.wrapping_sub(1)),
            (cx, cy + 1),
        ];
        for (nx, ny) in neighbors {
            if nx >= w || ny >= h || visited.get_pixel(nx, ny).0[0] != 0 {
                continue;
            }
            visited.put_pixel(nx, ny, image::Luma([1]));
            if let Some(p) = target.get(nx, ny)
                && colors_match(seed, p, tolerance)
            {
                queue.push_back((nx, ny));
            }
        }
    }

    let mut result = FillResult::default();
    for (px, py) in region {
        let weight = match selection {
            Some(m) if px < m.width() && py < m.height() => to_unit(m.get_pixel(px, py).0[0]),
            Some(_) => 0.0,
            None => 1.0,
        };
        if weight <= 0.0 {
            continue;
        }
        let new = if weight >= 1.0 {
            fill
        } else {
            let Some(old) = target.get(px, py) else { continue };
            let mut out = [0u8; 4];
            for c in 0..4 {
                out[c] = quantize(to_unit(old[c]) * (1.0 - weight) + to_unit(fill[c]) * weight);
            }
            Rgba(out)
        };
        target.put(px, py, new);
        result.filled += 1;
        let rect = DirtyRect { x0: px, y0: py, x1: px + 1, y1: py + 1 };
        result.bounds = Some(match result.bounds {
            Some(b) => DirtyRect {
                x0: b.x0.min(rect.x0),
                y0: b.y0.min(rect.y0),
                x1: b.x1.max(rect.x1),
                y1: b.y1.max(rect.y1),
            },
            None => rect,
        });
    }
    log::debug!("flood fill at ({}, {}): {} pixels", x, y, result.filled);
    Ok(result)
}
