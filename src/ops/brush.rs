// ============================================================================
// BRUSH ENGINE - stamp generation, stroke interpolation and dab compositing
// ============================================================================

use std::sync::Arc;

use image::{GrayImage, ImageBuffer, Luma, Rgba};

use crate::blend::{quantize, to_unit};
use crate::canvas::RasterBuffer;

/// Per-pixel coverage at or below this is skipped.
const ALPHA_EPSILON: f32 = 0.001;

/// Float falloff mask of a round brush.
pub type StampMask = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Whether a stroke deposits color or removes alpha.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StrokeKind {
    #[default]
    Paint,
    Erase,
}

/// Brush settings consumed by a stroke.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BrushParams {
    /// Stamp diameter in pixels.
    pub diameter: u32,
    /// Fraction of the radius that is fully opaque, `[0, 1]`.
    pub hardness: f32,
    pub opacity: f32,
    /// Distance between stamps as a fraction of the diameter.
    pub spacing: f32,
    /// Paint color. Its alpha scales `opacity`; the eraser ignores it.
    pub color: Rgba<u8>,
}

impl Default for BrushParams {
    fn default() -> Self {
        Self {
            diameter: 10,
            hardness: 0.8,
            opacity: 1.0,
            spacing: 0.1,
            color: Rgba([0, 0, 0, 255]),
        }
    }
}

impl BrushParams {
    /// Pixel distance between consecutive stamps, never below 1.
    pub fn spacing_px(&self) -> f32 {
        (self.diameter as f32 * self.spacing).max(1.0)
    }

    fn strength(&self, kind: StrokeKind) -> f32 {
        let opacity = if self.opacity.is_nan() { 0.0 } else { self.opacity.clamp(0.0, 1.0) };
        match kind {
            StrokeKind::Paint => opacity * to_unit(self.color[3]),
            StrokeKind::Erase => opacity,
        }
    }
}

// ============================================================================
// STAMP
// ============================================================================

/// A `diameter x diameter` coverage mask. A pure function of
/// `(diameter, hardness)`.
#[derive(Clone, Debug)]
pub struct BrushStamp {
    diameter: u32,
    hardness: f32,
    mask: StampMask,
}

impl BrushStamp {
    pub fn new(diameter: u32, hardness: f32) -> Self {
        let diameter = diameter.max(1);
        let hardness = if hardness.is_nan() { 1.0 } else { hardness.clamp(0.0, 1.0) };
        let radius = diameter as f32 / 2.0;
        let mask = ImageBuffer::from_fn(diameter, diameter, |x, y| {
            let dx = x as f32 + 0.5 - radius;
            let dy = y as f32 + 0.5 - radius;
            let d = (dx * dx + dy * dy).sqrt() / radius;
            Luma([falloff(d, hardness)])
        });
        Self { diameter, hardness, mask }
    }

    pub fn diameter(&self) -> u32 {
        self.diameter
    }

    pub fn hardness(&self) -> f32 {
        self.hardness
    }

    #[inline]
    pub fn alpha(&self, x: u32, y: u32) -> f32 {
        self.mask.get_pixel(x, y).0[0]
    }

    pub fn mask(&self) -> &StampMask {
        &self.mask
    }
}

/// 1 inside `hardness`, 0 beyond the rim, smoothstep in between.
fn falloff(d: f32, hardness: f32) -> f32 {
    if d <= hardness {
        1.0
    } else if d > 1.0 {
        0.0
    } else {
        let t = ((1.0 - d) / (1.0 - hardness)).clamp(0.0, 1.0);
        (t * t * (3.0 - 2.0 * t)).clamp(0.0, 1.0)
    }
}

/// Remembers the last generated stamp and rebuilds only when the key changes.
#[derive(Debug, Default)]
pub struct StampCache {
    stamp: Option<Arc<BrushStamp>>,
    builds: usize,
}

impl StampCache {
    pub fn get(&mut self, diameter: u32, hardness: f32) -> Arc<BrushStamp> {
        let key_diameter = diameter.max(1);
        let key_hardness = if hardness.is_nan() { 1.0 } else { hardness.clamp(0.0, 1.0) };
        if let Some(stamp) = &self.stamp
            && stamp.diameter == key_diameter
            && stamp.hardness.to_bits() == key_hardness.to_bits()
        {
            return stamp.clone();
        }
        let stamp = Arc::new(BrushStamp::new(key_diameter, key_hardness));
        self.builds += 1;
        self.stamp = Some(stamp.clone());
        stamp
    }

    /// Number of stamps generated so far.
    pub fn builds(&self) -> usize {
        self.builds
    }
}

// ============================================================================
// DAB COMPOSITING
// ============================================================================

/// Inclusive-exclusive pixel rectangle touched by a stroke.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirtyRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl DirtyRect {
    fn union(self, other: DirtyRect) -> DirtyRect {
        DirtyRect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

/// Apply one stamp centred on `center`. Pixels outside the buffer are
/// clipped and, with a selection, pixels where it is 0 are left alone.
/// Returns the touched rectangle, `None` when the stamp missed the buffer.
pub fn apply_stamp(
    target: &mut RasterBuffer,
    stamp: &BrushStamp,
    center: (f32, f32),
    params: &BrushParams,
    kind: StrokeKind,
    selection: Option<&GrayImage>,
) -> Option<DirtyRect> {
    let reach = stamp.diameter as f32;
    if !(center.0.is_finite() && center.1.is_finite())
        || center.0 < -reach
        || center.1 < -reach
        || center.0 > target.width() as f32 + reach
        || center.1 > target.height() as f32 + reach
    {
        return None;
    }
    let d = stamp.diameter as i64;
    let left = center.0.round() as i64 - d / 2;
    let top = center.1.round() as i64 - d / 2;

    let x0 = left.max(0);
    let y0 = top.max(0);
    let x1 = (left + d).min(target.width() as i64);
    let y1 = (top + d).min(target.height() as i64);
    if x0 >= x1 || y0 >= y1 {
        return None;
    }

    let strength = params.strength(kind);
    let brush = [to_unit(params.color[0]), to_unit(params.color[1]), to_unit(params.color[2])];

    for y in y0..y1 {
        for x in x0..x1 {
            let sel = match selection {
                Some(m) if x < m.width() as i64 && y < m.height() as i64 => {
                    to_unit(m.get_pixel(x as u32, y as u32).0[0])
                }
                Some(_) => 0.0,
                None => 1.0,
            };
            let a = stamp.alpha((x - left) as u32, (y - top) as u32) * strength * sel;
            if a <= ALPHA_EPSILON {
                continue;
            }
            let (px, py) = (x as u32, y as u32);
            let Some(old) = target.get(px, py) else { continue };
            let old_a = to_unit(old[3]);
            let new = match kind {
                StrokeKind::Paint => {
                    let mut out = [0u8; 4];
                    for c in 0..3 {
                        out[c] = quantize(to_unit(old[c]) * (1.0 - a) + brush[c] * a);
                    }
                    out[3] = quantize(old_a.max(a));
                    Rgba(out)
                }
                StrokeKind::Erase => Rgba([old[0], old[1], old[2], quantize(old_a * (1.0 - a))]),
            };
            target.put(px, py, new);
        }
    }
    Some(DirtyRect { x0: x0 as u32, y0: y0 as u32, x1: x1 as u32, y1: y1 as u32 })
}

/// Sample points from `from` to `to` that fall inside `bounds`
/// (`[x0, y0, x1, y1]`).
///
/// Positions are those of the whole segment: closer than `spacing` gives the
/// two endpoints, otherwise `ceil(dist / spacing)` equal steps. Clipping only
/// drops samples outside `bounds`, so the spacing phase along the path is
/// kept. Non-finite input yields nothing.
pub fn interpolate(from: (f32, f32), to: (f32, f32), spacing: f32, bounds: [f32; 4]) -> Vec<(f32, f32)> {
    let (fx, fy) = (from.0 as f64, from.1 as f64);
    let (tx, ty) = (to.0 as f64, to.1 as f64);
    let (dx, dy) = (tx - fx, ty - fy);
    let dist = (dx * dx + dy * dy).sqrt();
    if !dist.is_finite() {
        return Vec::new();
    }
    let Some((t0, t1)) = clip_segment((fx, fy), (dx, dy), bounds) else {
        return Vec::new();
    };
    let spacing = (spacing as f64).max(1.0);
    let steps = (dist / spacing).ceil().max(1.0);
    let first = (t0 * steps).ceil();
    let last = (t1 * steps).floor();
    if first > last {
        return Vec::new();
    }
    // Bounded by the clipped length, not by the index arithmetic.
    let count = ((last - first) as usize + 1).min(((t1 - t0) * steps).ceil() as usize + 1);
    (0..count)
        .map(|k| {
            let t = ((first + k as f64) / steps).min(1.0);
            ((fx * (1.0 - t) + tx * t) as f32, (fy * (1.0 - t) + ty * t) as f32)
        })
        .collect()
}

/// Liang-Barsky: the parameter range of `p + t * d`, `t` in `[0, 1]`, inside
/// `bounds`.
fn clip_segment(p: (f64, f64), d: (f64, f64), bounds: [f32; 4]) -> Option<(f64, f64)> {
    let [x0, y0, x1, y1] = bounds.map(f64::from);
    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    for (pk, qk) in [(-d.0, p.0 - x0), (d.0, x1 - p.0), (-d.1, p.1 - y0), (d.1, y1 - p.1)] {
        if pk == 0.0 {
            if qk < 0.0 {
                return None;
            }
            continue;
        }
        let r = qk / pk;
        if pk < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }
    Some((t0, t1))
}

/// Area a stamp centre must fall in to touch a `width x height` buffer.
fn stamp_reach(target: &RasterBuffer, diameter: u32) -> [f32; 4] {
    let r = diameter.max(1) as f32;
    [-r, -r, target.width() as f32 + r, target.height() as f32 + r]
}

// ============================================================================
// STROKE STATE MACHINE
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum StrokeState {
    #[default]
    Idle,
    Drawing {
        anchor: (f32, f32),
    },
}

/// What a finished stroke did.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct StrokeSummary {
    pub stamps: usize,
    pub dirty: Option<DirtyRect>,
}

/// Drives one stroke at a time: `start`, any number of `move_to`, `end`.
///
/// The engine never owns pixels; every call that stamps borrows the target
/// buffer, so the caller decides which layer a stroke lands on and when the
/// result is committed to history.
#[derive(Debug, Default)]
pub struct BrushEngine {
    state: StrokeState,
    cache: StampCache,
    stamps: usize,
    dirty: Option<DirtyRect>,
}

impl BrushEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> StrokeState {
        self.state
    }

    pub fn is_drawing(&self) -> bool {
        matches!(self.state, StrokeState::Drawing { .. })
    }

    pub fn cache(&self) -> &StampCache {
        &self.cache
    }

    /// Begin a stroke at `point`. No pixels change. `false` if a stroke is
    /// already in progress.
    pub fn start(&mut self, point: (f32, f32)) -> bool {
        if self.is_drawing() {
            return false;
        }
        self.state = StrokeState::Drawing { anchor: point };
        self.stamps = 0;
        self.dirty = None;
        true
    }

    /// Extend the stroke to `point`, stamping along the way in path order.
    /// Returns the number of stamps applied (0 when idle).
    pub fn move_to(
        &mut self,
        target: &mut RasterBuffer,
        point: (f32, f32),
        params: &BrushParams,
        kind: StrokeKind,
        selection: Option<&GrayImage>,
    ) -> usize {
        let StrokeState::Drawing { anchor } = self.state else {
            return 0;
        };
        if point == anchor {
            return 0;
        }
        let stamp = self.cache.get(params.diameter, params.hardness);
        let samples = interpolate(anchor, point, params.spacing_px(), stamp_reach(target, stamp.diameter));
        let mut applied = 0;
        for sample in samples {
            // The anchor was already stamped as the previous segment's end.
            if self.stamps > 0 && sample == anchor {
                continue;
            }
            self.stamp_at(target, &stamp, sample, params, kind, selection);
            applied += 1;
        }
        self.state = StrokeState::Drawing { anchor: point };
        applied
    }

    /// Finish the stroke. A click without motion leaves a single dab.
    pub fn end(
        &mut self,
        target: &mut RasterBuffer,
        params: &BrushParams,
        kind: StrokeKind,
        selection: Option<&GrayImage>,
    ) -> StrokeSummary {
        let StrokeState::Drawing { anchor } = self.state else {
            return StrokeSummary::default();
        };
        if self.stamps == 0 {
            let stamp = self.cache.get(params.diameter, params.hardness);
            self.stamp_at(target, &stamp, anchor, params, kind, selection);
        }
        self.state = StrokeState::Idle;
        StrokeSummary { stamps: self.stamps, dirty: self.dirty.take() }
    }

    /// Abandon the stroke without further stamping.
    pub fn cancel(&mut self) {
        self.state = StrokeState::Idle;
        self.stamps = 0;
        self.dirty = None;
    }

    fn stamp_at(
        &mut self,
        target: &mut RasterBuffer,
        stamp: &BrushStamp,
        center: (f32, f32),
        params: &BrushParams,
        kind: StrokeKind,
        selection: Option<&GrayImage>,
    ) {
        self.stamps += 1;
        if let Some(rect) = apply_stamp(target, stamp, center, params, kind, selection) {
            self.dirty = Some(match self.dirty {
                Some(d) => d.union(rect),
                None => rect,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opaque(w: u32, h: u32, c: [u8; 4]) -> RasterBuffer {
        RasterBuffer::filled(w, h, Rgba(c)).unwrap()
    }

    #[test]
    fn stamp_profile() {
        let stamp = BrushStamp::new(11, 0.5);
        assert_eq!(stamp.alpha(5, 5), 1.0);
        assert_eq!(stamp.alpha(0, 0), 0.0);
        let edge = stamp.alpha(9, 5);
        assert!(edge > 0.0 && edge < 1.0, "edge alpha {}", edge);
    }

    #[test]
    fn cache_rebuilds_only_on_key_change() {
        let mut cache = StampCache::default();
        cache.get(8, 0.5);
        cache.get(8, 0.5);
        assert_eq!(cache.builds(), 1);
        cache.get(8, 0.6);
        cache.get(9, 0.6);
        assert_eq!(cache.builds(), 3);
    }

    const WIDE: [f32; 4] = [-100.0, -100.0, 100.0, 100.0];

    #[test]
    fn interpolation_spacing() {
        assert_eq!(interpolate((0.0, 0.0), (0.5, 0.0), 2.0, WIDE), vec![(0.0, 0.0), (0.5, 0.0)]);
        let pts = interpolate((0.0, 0.0), (10.0, 0.0), 3.0, WIDE);
        assert_eq!(pts.len(), 5);
        assert_eq!(pts[0], (0.0, 0.0));
        assert_eq!(pts[4], (10.0, 0.0));
        for w in pts.windows(2) {
            assert!(w[1].0 - w[0].0 <= 3.0);
        }
    }

    #[test]
    fn paint_uses_max_alpha_and_lerps_color() {
        let mut buf = opaque(1, 1, [0, 0, 0, 100]);
        let stamp = BrushStamp::new(1, 1.0);
        let params = BrushParams { diameter: 1, opacity: 0.5, color: Rgba([255, 255, 255, 255]), ..Default::default() };
        apply_stamp(&mut buf, &stamp, (0.0, 0.0), &params, StrokeKind::Paint, None).unwrap();
        assert_eq!(buf.get(0, 0), Some(Rgba([128, 128, 128, 128])));
    }

    #[test]
    fn stamp_off_canvas_is_noop() {
        let mut buf = opaque(4, 4, [1, 2, 3, 255]);
        let before = buf.clone();
        let stamp = BrushStamp::new(3, 1.0);
        let params = BrushParams { diameter: 3, ..Default::default() };
        assert!(apply_stamp(&mut buf, &stamp, (-10.0, 2.0), &params, StrokeKind::Paint, None).is_none());
        assert_eq!(buf, before);
    }

    #[test]
    fn far_away_stamp_is_noop() {
        let mut buf = opaque(10, 10, [1, 2, 3, 255]);
        let before = buf.clone();
        let stamp = BrushStamp::new(9, 1.0);
        let params = BrushParams { diameter: 9, hardness: 1.0, ..Default::default() };
        for center in [(1e30, 1e30), (-1e30, 0.0), (f32::NAN, 3.0), (f32::INFINITY, 0.0)] {
            assert!(apply_stamp(&mut buf, &stamp, center, &params, StrokeKind::Erase, None).is_none());
        }
        assert_eq!(buf, before);
    }

    #[test]
    fn clipping_keeps_spacing_phase() {
        // Samples of 0..=20 at spacing 2, kept only where x is within [5, 11].
        let pts = interpolate((0.0, 0.0), (20.0, 0.0), 2.0, [5.0, -1.0, 11.0, 1.0]);
        assert_eq!(pts, vec![(6.0, 0.0), (8.0, 0.0), (10.0, 0.0)]);
        assert!(interpolate((0.0, 50.0), (20.0, 50.0), 2.0, WIDE.map(|v| v / 10.0)).is_empty());
        assert!(interpolate((0.0, 0.0), (f32::INFINITY, 0.0), 1.0, WIDE).is_empty());
    }

    #[test]
    fn long_off_canvas_segment_only_stamps_near_canvas() {
        let mut engine = BrushEngine::new();
        let mut buf = RasterBuffer::new(10, 10).unwrap();
        let params = BrushParams { diameter: 1, hardness: 1.0, ..Default::default() };
        engine.start((0.0, 0.0));
        let applied = engine.move_to(&mut buf, (2e7, 0.0), &params, StrokeKind::Paint, None);
        assert!(applied > 0 && applied <= 13, "applied {}", applied);
        assert_eq!(buf.get(9, 0), Some(Rgba([0, 0, 0, 255])));

        // Entering from far away still lands the stroke end on the canvas.
        let mut engine = BrushEngine::new();
        let mut buf = RasterBuffer::new(10, 10).unwrap();
        engine.start((-1e30, 5.0));
        assert_eq!(engine.move_to(&mut buf, (5.0, 5.0), &params, StrokeKind::Paint, None), 1);
        assert_eq!(buf.get(5, 5), Some(Rgba([0, 0, 0, 255])));
        engine.end(&mut buf, &params, StrokeKind::Paint, None);

        engine.start((1e30, 1e30));
        assert_eq!(engine.end(&mut buf, &params, StrokeKind::Paint, None).dirty, None);
    }

    #[test]
    fn selection_blocks_writes() {
        let mut buf = opaque(2, 1, [0, 0, 0, 255]);
        let mut sel = GrayImage::new(2, 1);
        sel.put_pixel(1, 0, Luma([255]));
        let stamp = BrushStamp::new(4, 1.0);
        let params = BrushParams { diameter: 4, color: Rgba([255, 0, 0, 255]), ..Default::default() };
        apply_stamp(&mut buf, &stamp, (1.0, 0.0), &params, StrokeKind::Paint, Some(&sel));
        assert_eq!(buf.get(0, 0), Some(Rgba([0, 0, 0, 255])));
        assert_eq!(buf.get(1, 0), Some(Rgba([255, 0, 0, 255])));
    }

    #[test]
    fn state_machine() {
        let mut engine = BrushEngine::new();
        let mut buf = RasterBuffer::new(20, 20).unwrap();
        let params = BrushParams { diameter: 4, spacing: 0.5, ..Default::default() };

        assert_eq!(engine.move_to(&mut buf, (5.0, 5.0), &params, StrokeKind::Paint, None), 0);
        assert!(buf.as_raw().iter().all(|b| *b == 0));

        assert!(engine.start((2.0, 2.0)));
        assert!(!engine.start((3.0, 3.0)));
        assert!(buf.as_raw().iter().all(|b| *b == 0));

        // 8px at 2px spacing: 5 samples, all stamped on the first segment.
        assert_eq!(engine.move_to(&mut buf, (10.0, 2.0), &params, StrokeKind::Paint, None), 5);
        // Next segment skips the shared point.
        assert_eq!(engine.move_to(&mut buf, (10.0, 6.0), &params, StrokeKind::Paint, None), 2);
        let summary = engine.end(&mut buf, &params, StrokeKind::Paint, None);
        assert_eq!(summary.stamps, 7);
        assert!(summary.dirty.is_some());
        assert_eq!(engine.state(), StrokeState::Idle);
    }

    #[test]
    fn click_leaves_one_dab() {
        let mut engine = BrushEngine::new();
        let mut buf = RasterBuffer::new(10, 10).unwrap();
        let params = BrushParams { diameter: 3, hardness: 1.0, ..Default::default() };
        engine.start((5.0, 5.0));
        let summary = engine.end(&mut buf, &params, StrokeKind::Paint, None);
        assert_eq!(summary.stamps, 1);
        assert_eq!(buf.get(5, 5), Some(Rgba([0, 0, 0, 255])));
        assert_eq!(buf.get(0, 0), Some(Rgba([0, 0, 0, 0])));
    }
}
