use std::fmt;

use image::{GrayImage, Rgba, RgbaImage, imageops};
use rayon::prelude::*;
use uuid::Uuid;

use crate::blend::BlendMode;
use crate::compositor::{self, CompositeReport};
use crate::error::{EngineError, Result};
use crate::ops::transform::{self, Anchor};

/// Hard upper bound on pixels in any single buffer (256M pixels, ~1 GB RGBA).
pub const MAX_PIXELS: u64 = 256 * 1024 * 1024;

pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

// ============================================================================
// ALLOCATION
// ============================================================================

/// Allocate `width * height * channels` bytes filled with `pattern`, reporting
/// failure instead of aborting the process.
fn try_alloc(width: u32, height: u32, pattern: &[u8]) -> Result<Vec<u8>> {
    let fail = || EngineError::Allocation { width, height };
    let pixels = width as u64 * height as u64;
    if pixels > MAX_PIXELS {
        return Err(fail());
    }
    let len = usize::try_from(pixels * pattern.len() as u64).map_err(|_| fail())?;
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|_| fail())?;
    if pattern.iter().all(|b| *b == pattern[0]) {
        data.resize(len, pattern[0]);
    } else {
        for _ in 0..pixels {
            data.extend_from_slice(pattern);
        }
    }
    Ok(data)
}

fn try_copy(width: u32, height: u32, src: &[u8]) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(src.len())
        .map_err(|_| EngineError::Allocation { width, height })?;
    data.extend_from_slice(src);
    Ok(data)
}

/// Fallible `GrayImage` constructor used for masks.
pub fn try_gray(width: u32, height: u32, value: u8) -> Result<GrayImage> {
    let data = try_alloc(width, height, &[value])?;
    GrayImage::from_raw(width, height, data).ok_or(EngineError::Allocation { width, height })
}

pub fn try_clone_gray(mask: &GrayImage) -> Result<GrayImage> {
    let (w, h) = mask.dimensions();
    let data = try_copy(w, h, mask.as_raw())?;
    GrayImage::from_raw(w, h, data).ok_or(EngineError::Allocation { width: w, height: h })
}

// ============================================================================
// RASTER BUFFER
// ============================================================================

/// A width x height RGBA8 buffer, row-major, no padding.
///
/// Never resized in place: operations that change dimensions build a new
/// buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct RasterBuffer {
    image: RgbaImage,
}

impl fmt::Debug for RasterBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterBuffer")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

impl RasterBuffer {
    /// Fully transparent buffer.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        Self::filled(width, height, TRANSPARENT)
    }

    pub fn filled(width: u32, height: u32, color: Rgba<u8>) -> Result<Self> {
        let data = try_alloc(width, height, &color.0)?;
        let image = RgbaImage::from_raw(width, height, data)
            .ok_or(EngineError::Allocation { width, height })?;
        Ok(Self { image })
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Wrap raw RGBA bytes. `None` if the length does not match the size.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        RgbaImage::from_raw(width, height, data).map(Self::from_image)
    }

    /// Deep copy that reports allocation failure.
    pub fn try_clone(&self) -> Result<Self> {
        let data = try_copy(self.width(), self.height(), self.image.as_raw())?;
        Self::from_raw(self.width(), self.height(), data).ok_or(EngineError::Allocation {
            width: self.width(),
            height: self.height(),
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    #[inline]
    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width() as i64 && y < self.height() as i64
    }

    /// Bounds-checked read.
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
        if x < self.width() && y < self.height() {
            Some(*self.image.get_pixel(x, y))
        } else {
            None
        }
    }

    /// Read with transparent padding outside the buffer.
    #[inline]
    pub fn sample(&self, x: i64, y: i64) -> Rgba<u8> {
        if self.in_bounds(x, y) {
            *self.image.get_pixel(x as u32, y as u32)
        } else {
            TRANSPARENT
        }
    }

    /// Bounds-checked write. Returns `false` (and writes nothing) outside.
    #[inline]
    pub fn put(&mut self, x: u32, y: u32, px: Rgba<u8>) -> bool {
        if x < self.width() && y < self.height() {
            self.image.put_pixel(x, y, px);
            true
        } else {
            false
        }
    }

    pub fn fill(&mut self, color: Rgba<u8>) {
        for px in self.image.pixels_mut() {
            *px = color;
        }
    }

    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Mutable RGBA rows, for writers that work row by row.
    pub fn rows_mut(&mut self) -> std::slice::ChunksExactMut<'_, u8> {
        let stride = self.width() as usize * 4;
        self.image.chunks_exact_mut(stride.max(1))
    }

    /// Copy `src` into this buffer with its top-left at `(x, y)`, clipping to
    /// the overlap.
    pub fn paste(&mut self, src: &RasterBuffer, x: i64, y: i64) {
        imageops::replace(&mut self.image, &src.image, x, y);
    }

    /// Copy of this buffer padded with transparency or cropped, anchored at
    /// the top-left, to exactly `width x height`.
    pub fn conformed(&self, width: u32, height: u32) -> Result<RasterBuffer> {
        if self.dimensions() == (width, height) {
            return self.try_clone();
        }
        let mut out = RasterBuffer::new(width, height)?;
        out.paste(self, 0, 0);
        Ok(out)
    }

    pub fn memory_bytes(&self) -> usize {
        self.image.as_raw().len()
    }
}

// ============================================================================
// LAYER
// ============================================================================

/// The user-editable metadata of a layer.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerProperties {
    pub name: String,
    pub visible: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub locked: bool,
}

#[derive(Clone, Debug)]
pub struct Layer {
    id: Uuid,
    pub name: String,
    pixels: RasterBuffer,
    /// Gray8 mask, always the same size as `pixels`.
    mask: Option<GrayImage>,
    pub visible: bool,
    opacity: f32,
    pub blend_mode: BlendMode,
    /// Locked layers refuse paint, fill and filter writes.
    pub locked: bool,
}

impl Layer {
    /// New fully transparent layer.
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Result<Self> {
        Ok(Self::from_buffer(name, RasterBuffer::new(width, height)?))
    }

    pub fn filled(name: impl Into<String>, width: u32, height: u32, color: Rgba<u8>) -> Result<Self> {
        Ok(Self::from_buffer(name, RasterBuffer::filled(width, height, color)?))
    }

    pub fn from_buffer(name: impl Into<String>, pixels: RasterBuffer) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            pixels,
            mask: None,
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            locked: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RasterBuffer {
        &self.pixels
    }

    /// In-place pixel access. The buffer cannot change size through this.
    pub fn pixels_mut(&mut self) -> &mut RasterBuffer {
        &mut self.pixels
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Clamped to `[0, 1]`; NaN becomes 0.
    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = if opacity.is_nan() { 0.0 } else { opacity.clamp(0.0, 1.0) };
    }

    pub fn mask(&self) -> Option<&GrayImage> {
        self.mask.as_ref()
    }

    pub fn has_mask(&self) -> bool {
        self.mask.is_some()
    }

    /// Assign a mask, rescaling it (bilinear) when its size differs from the
    /// layer's.
    pub fn set_mask(&mut self, mask: Option<GrayImage>) {
        self.mask = mask.map(|m| {
            let (w, h) = self.pixels.dimensions();
            if m.dimensions() == (w, h) {
                m
            } else {
                log::debug!(
                    "layer '{}': rescaling mask {}x{} -> {}x{}",
                    self.name,
                    m.width(),
                    m.height(),
                    w,
                    h
                );
                imageops::resize(&m, w, h, imageops::FilterType::Triangle)
            }
        });
    }

    /// Swap in pixels and mask from a history snapshot.
    pub(crate) fn restore_content(&mut self, pixels: RasterBuffer, mask: Option<GrayImage>) {
        self.pixels = pixels;
        self.mask = mask;
    }

    /// `visible`, non-zero opacity.
    pub fn contributes(&self) -> bool {
        self.visible && self.opacity > compositor::OPACITY_EPSILON
    }

    pub fn properties(&self) -> LayerProperties {
        LayerProperties {
            name: self.name.clone(),
            visible: self.visible,
            opacity: self.opacity,
            blend_mode: self.blend_mode,
            locked: self.locked,
        }
    }

    pub fn apply_properties(&mut self, props: &LayerProperties) {
        self.name = props.name.clone();
        self.visible = props.visible;
        self.set_opacity(props.opacity);
        self.blend_mode = props.blend_mode;
        self.locked = props.locked;
    }

    /// Deep copy with the same id. Used for history snapshots.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            id: self.id,
            name: self.name.clone(),
            pixels: self.pixels.try_clone()?,
            mask: match &self.mask {
                Some(m) => Some(try_clone_gray(m)?),
                None => None,
            },
            visible: self.visible,
            opacity: self.opacity,
            blend_mode: self.blend_mode,
            locked: self.locked,
        })
    }

    /// Deep copy under a fresh id and a `" copy"` name suffix.
    pub fn duplicate(&self) -> Result<Self> {
        let mut copy = self.try_clone()?;
        copy.id = Uuid::new_v4();
        copy.name = format!("{} copy", self.name);
        Ok(copy)
    }

    pub fn memory_bytes(&self) -> usize {
        self.pixels.memory_bytes() + self.mask.as_ref().map_or(0, |m| m.as_raw().len())
    }
}

// ============================================================================
// LAYER STACK
// ============================================================================

/// Ordered layers (index 0 = bottom), the active selection and the canvas
/// size every composite conforms to.
#[derive(Clone, Debug)]
pub struct LayerStack {
    layers: Vec<Layer>,
    active_index: Option<usize>,
    width: u32,
    height: u32,
}

impl LayerStack {
    /// Empty stack.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            layers: Vec::new(),
            active_index: None,
            width,
            height,
        }
    }

    /// New document with a single `Background` layer.
    pub fn with_background(width: u32, height: u32, color: Rgba<u8>) -> Result<Self> {
        let mut stack = Self::new(width, height);
        stack.add(Layer::filled("Background", width, height, color)?, None);
        Ok(stack)
    }

    /// Stack sized to `buffer`, holding it as its only layer.
    pub fn from_buffer(name: impl Into<String>, buffer: RasterBuffer) -> Self {
        let mut stack = Self::new(buffer.width(), buffer.height());
        stack.add(Layer::from_buffer(name, buffer), None);
        stack
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut Layer> {
        self.layers.get_mut(index)
    }

    pub fn index_of(&self, id: Uuid) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active_index
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.active_index.and_then(|i| self.layers.get(i))
    }

    pub fn active_layer_mut(&mut self) -> Option<&mut Layer> {
        self.active_index.and_then(|i| self.layers.get_mut(i))
    }

    pub fn set_active(&mut self, index: usize) -> bool {
        if index < self.layers.len() {
            self.active_index = Some(index);
            true
        } else {
            log::warn!("set_active: invalid layer index {}", index);
            false
        }
    }

    /// Insert `layer` at `position` (clamped; `None` appends) and make it
    /// active. Returns the index it landed at.
    pub fn add(&mut self, layer: Layer, position: Option<usize>) -> usize {
        let index = position.map_or(self.layers.len(), |p| p.min(self.layers.len()));
        log::info!("Added layer '{}' at position {}", layer.name, index);
        self.layers.insert(index, layer);
        self.active_index = Some(index);
        index
    }

    /// Add a new transparent canvas-sized layer above the active one.
    pub fn add_new_layer(&mut self, name: impl Into<String>) -> Result<usize> {
        let layer = Layer::new(name, self.width, self.height)?;
        let position = self.active_index.map(|i| i + 1);
        Ok(self.add(layer, position))
    }

    /// Remove a layer. The active layer keeps its identity when it sits above
    /// the removed slot; when it was the removed layer the selection moves to
    /// `min(index, len - 1)`.
    pub fn remove(&mut self, index: usize) -> Option<Layer> {
        if index >= self.layers.len() {
            log::warn!("Failed to delete layer at index {}: invalid index", index);
            return None;
        }
        let removed = self.layers.remove(index);
        self.active_index = match self.active_index {
            _ if self.layers.is_empty() => None,
            Some(a) if a == index => Some(index.min(self.layers.len() - 1)),
            Some(a) if a > index => Some(a - 1),
            other => other,
        };
        log::info!("Deleted layer '{}' at position {}", removed.name, index);
        Some(removed)
    }

    /// Move a layer. `to` is clamped; the active index follows the layers.
    pub fn move_layer(&mut self, from: usize, to: usize) -> bool {
        if from >= self.layers.len() {
            log::warn!("move_layer: invalid from index {}", from);
            return false;
        }
        let to = to.min(self.layers.len() - 1);
        if from == to {
            return true;
        }
        let layer = self.layers.remove(from);
        self.layers.insert(to, layer);
        if let Some(a) = self.active_index {
            self.active_index = Some(if a == from {
                to
            } else if from < a && a <= to {
                a - 1
            } else if to <= a && a < from {
                a + 1
            } else {
                a
            });
        }
        log::info!("Moved layer from {} to {}", from, to);
        true
    }

    /// Deep copy of a layer inserted directly above it. `Ok(None)` for an
    /// invalid index.
    pub fn duplicate(&mut self, index: usize) -> Result<Option<usize>> {
        let Some(source) = self.layers.get(index) else {
            log::warn!("duplicate: invalid layer index {}", index);
            return Ok(None);
        };
        let copy = source.duplicate()?;
        Ok(Some(self.add(copy, Some(index + 1))))
    }

    /// Composite the selected layers into one `Merged Layer` at the lowest
    /// selected position. `Ok(None)` (stack untouched) for an empty selection
    /// or any invalid index.
    pub fn merge(&mut self, indices: &[usize]) -> Result<Option<usize>> {
        if indices.is_empty() || indices.iter().any(|&i| i >= self.layers.len()) {
            log::warn!("Invalid layer indices for merging: {:?}", indices);
            return Ok(None);
        }
        let mut sorted = indices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let selected: Vec<&Layer> = sorted.iter().map(|&i| &self.layers[i]).collect();
        let (merged, report) = compositor::composite_layers(self.width, self.height, &selected)?;
        report.log();

        let bottom = sorted[0];
        for &i in sorted.iter().rev() {
            self.layers.remove(i);
        }
        // Indices are re-derived after the removals.
        self.active_index = None;
        let index = self.add(Layer::from_buffer("Merged Layer", merged), Some(bottom));
        log::info!("Merged {} layers into a new layer at position {}", sorted.len(), index);
        Ok(Some(index))
    }

    /// Resize the canvas. Each layer is re-laid onto a `background`-filled
    /// buffer of the new size at the anchor offset; masks get the same
    /// geometry with 0 in the new area. The stack is untouched on error.
    pub fn resize_canvas(&mut self, width: u32, height: u32, anchor: Anchor, background: Rgba<u8>) -> Result<()> {
        let (dx, dy) = anchor.offset(self.width, self.height, width, height);
        let rebuilt = self
            .layers
            .par_iter()
            .map(|layer| transform::relaid_layer(layer, width, height, dx, dy, background))
            .collect::<Result<Vec<_>>>()?;
        for (layer, (pixels, mask)) in self.layers.iter_mut().zip(rebuilt) {
            layer.pixels = pixels;
            layer.mask = mask;
        }
        log::info!(
            "Resized canvas {}x{} -> {}x{} (anchor {})",
            self.width,
            self.height,
            width,
            height,
            anchor.name()
        );
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Crop every layer to the given canvas rectangle. The rectangle is
    /// clipped to the canvas; `Ok(false)` if nothing is left.
    pub fn crop(&mut self, x: u32, y: u32, width: u32, height: u32) -> Result<bool> {
        let Some((x, y, w, h)) = transform::clip_rect(self.width, self.height, x, y, width, height) else {
            log::warn!("crop: rectangle lies outside the canvas");
            return Ok(false);
        };
        let rebuilt = self
            .layers
            .par_iter()
            .map(|layer| transform::relaid_layer(layer, w, h, -(x as i64), -(y as i64), TRANSPARENT))
            .collect::<Result<Vec<_>>>()?;
        for (layer, (pixels, mask)) in self.layers.iter_mut().zip(rebuilt) {
            layer.pixels = pixels;
            layer.mask = mask;
        }
        log::info!("Cropped canvas to {}x{} at ({}, {})", w, h, x, y);
        self.width = w;
        self.height = h;
        Ok(true)
    }

    /// Rescale every layer (and mask) to a new canvas size.
    pub fn scale_image(&mut self, width: u32, height: u32, interp: transform::Interpolation) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(EngineError::Allocation { width, height });
        }
        // Fail before doing any work if the target cannot be held.
        RasterBuffer::new(width, height)?;
        self.layers.par_iter_mut().for_each(|layer| {
            let scaled = imageops::resize(layer.pixels.as_image(), width, height, interp.to_filter());
            layer.pixels = RasterBuffer::from_image(scaled);
            if let Some(mask) = layer.mask.take() {
                layer.mask = Some(imageops::resize(&mask, width, height, interp.to_filter()));
            }
        });
        log::info!("Scaled image {}x{} -> {}x{}", self.width, self.height, width, height);
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Replace every layer with one `Background` layer holding the composite.
    pub fn flatten(&mut self) -> Result<()> {
        let flat = self.render()?;
        self.layers.clear();
        self.active_index = None;
        self.add(Layer::from_buffer("Background", flat), None);
        Ok(())
    }

    /// Composite the whole stack to a canvas-sized buffer.
    pub fn render(&self) -> Result<RasterBuffer> {
        compositor::render(self)
    }

    pub fn render_range(&self, start: usize, end: Option<usize>) -> Result<RasterBuffer> {
        compositor::render_range(self, start, end)
    }

    pub fn render_with_report(&self) -> Result<(RasterBuffer, CompositeReport)> {
        compositor::render_with_report(self, 0, None)
    }

    pub fn memory_bytes(&self) -> usize {
        self.layers.iter().map(Layer::memory_bytes).sum()
    }

    /// Deep copy that reports allocation failure.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            layers: self.layers.iter().map(Layer::try_clone).collect::<Result<Vec<_>>>()?,
            active_index: self.active_index,
            width: self.width,
            height: self.height,
        })
    }

    /// Overwrite the whole state from a snapshot.
    pub(crate) fn restore_from(&mut self, snapshot: &LayerStack) {
        self.clone_from(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn luma(v: u8) -> Luma<u8> {
        Luma([v])
    }

    fn named(names: &[&str]) -> LayerStack {
        let mut stack = LayerStack::new(4, 4);
        for n in names {
            stack.add(Layer::new(*n, 4, 4).unwrap(), None);
        }
        stack
    }

    fn names(stack: &LayerStack) -> Vec<&str> {
        stack.layers().iter().map(|l| l.name.as_str()).collect()
    }

    #[test]
    fn raster_reads_and_writes_are_bounds_checked() {
        let mut buf = RasterBuffer::new(3, 2).unwrap();
        assert_eq!(buf.as_raw().len(), 3 * 2 * 4);
        assert!(buf.put(2, 1, Rgba([1, 2, 3, 4])));
        assert!(!buf.put(3, 0, Rgba([9, 9, 9, 9])));
        assert_eq!(buf.get(2, 1), Some(Rgba([1, 2, 3, 4])));
        assert_eq!(buf.get(0, 2), None);
        assert_eq!(buf.sample(-1, 0), TRANSPARENT);
    }

    #[test]
    fn oversized_allocation_is_an_error() {
        let err = RasterBuffer::new(70_000, 70_000).unwrap_err();
        assert!(matches!(err, EngineError::Allocation { width: 70_000, height: 70_000 }));
    }

    #[test]
    fn opacity_is_clamped() {
        let mut layer = Layer::new("a", 1, 1).unwrap();
        layer.set_opacity(1.5);
        assert_eq!(layer.opacity(), 1.0);
        layer.set_opacity(-2.0);
        assert_eq!(layer.opacity(), 0.0);
        layer.set_opacity(f32::NAN);
        assert_eq!(layer.opacity(), 0.0);
    }

    #[test]
    fn mismatched_mask_is_rescaled() {
        let mut layer = Layer::new("a", 8, 6).unwrap();
        layer.set_mask(Some(GrayImage::from_pixel(2, 2, luma(255))));
        let mask = layer.mask().unwrap();
        assert_eq!(mask.dimensions(), (8, 6));
        assert!(mask.pixels().all(|p| p.0[0] >= 254));
    }

    #[test]
    fn add_clamps_position_and_activates() {
        let mut stack = named(&["a", "b"]);
        let idx = stack.add(Layer::new("c", 4, 4).unwrap(), Some(99));
        assert_eq!(idx, 2);
        assert_eq!(stack.active_index(), Some(2));
        let idx = stack.add(Layer::new("d", 4, 4).unwrap(), Some(0));
        assert_eq!(idx, 0);
        assert_eq!(names(&stack), ["d", "a", "b", "c"]);
    }

    #[test]
    fn remove_retargets_active_index() {
        let mut stack = named(&["a", "b", "c"]);
        assert!(stack.remove(5).is_none());
        assert_eq!(stack.len(), 3);

        // Active is the top layer; removing it moves selection down.
        assert!(stack.remove(2).is_some());
        assert_eq!(stack.active_index(), Some(1));

        // Active above the removed slot keeps pointing at the same layer.
        assert!(stack.remove(0).is_some());
        assert_eq!(stack.active_index(), Some(0));
        assert_eq!(stack.active_layer().unwrap().name, "b");

        assert!(stack.remove(0).is_some());
        assert_eq!(stack.active_index(), None);
    }

    #[test]
    fn move_tracks_active_layer() {
        let mut stack = named(&["a", "b", "c", "d"]);
        stack.set_active(1);
        assert!(stack.move_layer(0, 10));
        assert_eq!(names(&stack), ["b", "c", "d", "a"]);
        assert_eq!(stack.active_layer().unwrap().name, "b");

        stack.set_active(3);
        assert!(stack.move_layer(3, 1));
        assert_eq!(names(&stack), ["b", "a", "c", "d"]);
        assert_eq!(stack.active_index(), Some(1));

        assert!(stack.move_layer(2, 2));
        assert!(!stack.move_layer(4, 0));
    }

    #[test]
    fn duplicate_inserts_above_with_fresh_id() {
        let mut stack = named(&["a", "b"]);
        stack.layer_mut(0).unwrap().set_mask(Some(GrayImage::from_pixel(4, 4, luma(7))));
        let idx = stack.duplicate(0).unwrap().unwrap();
        assert_eq!(idx, 1);
        assert_eq!(names(&stack), ["a", "a copy", "b"]);
        assert_ne!(stack.layer(0).unwrap().id(), stack.layer(1).unwrap().id());
        assert_eq!(stack.layer(1).unwrap().mask(), stack.layer(0).unwrap().mask());
        assert_eq!(stack.duplicate(9).unwrap(), None);
    }

    #[test]
    fn merge_rejects_bad_selection() {
        let mut stack = named(&["a", "b"]);
        assert_eq!(stack.merge(&[]).unwrap(), None);
        assert_eq!(stack.merge(&[0, 2]).unwrap(), None);
        assert_eq!(names(&stack), ["a", "b"]);
    }

    #[test]
    fn merge_replaces_selection_at_lowest_index() {
        let mut stack = named(&["a", "b", "c", "d"]);
        stack.layer_mut(1).unwrap().pixels_mut().fill(Rgba([255, 0, 0, 255]));
        let idx = stack.merge(&[3, 1, 1]).unwrap().unwrap();
        assert_eq!(idx, 1);
        assert_eq!(names(&stack), ["a", "Merged Layer", "c"]);
        assert_eq!(stack.active_index(), Some(1));
        assert_eq!(stack.layer(1).unwrap().pixels().get(0, 0), Some(Rgba([255, 0, 0, 255])));
    }

    #[test]
    fn crop_keeps_rectangle() {
        let mut stack = named(&["a"]);
        stack.layer_mut(0).unwrap().pixels_mut().put(2, 3, Rgba([9, 9, 9, 255]));
        assert!(stack.crop(1, 1, 10, 10).unwrap());
        assert_eq!((stack.width(), stack.height()), (3, 3));
        assert_eq!(stack.layer(0).unwrap().pixels().get(1, 2), Some(Rgba([9, 9, 9, 255])));
        assert!(!stack.crop(50, 50, 2, 2).unwrap());
    }

    #[test]
    fn flatten_leaves_single_background() {
        let mut stack = LayerStack::with_background(2, 2, Rgba([10, 20, 30, 255])).unwrap();
        stack.add_new_layer("Layer 1").unwrap();
        stack.flatten().unwrap();
        assert_eq!(names(&stack), ["Background"]);
        assert_eq!(stack.layer(0).unwrap().pixels().get(1, 1), Some(Rgba([10, 20, 30, 255])));
    }
}
