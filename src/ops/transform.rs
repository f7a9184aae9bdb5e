// ============================================================================
// TRANSFORM OPERATIONS - canvas resize, crop and image scaling geometry
// ============================================================================

use image::{GrayImage, Rgba, imageops};

use crate::canvas::{Layer, RasterBuffer, try_gray};
use crate::error::Result;

/// Interpolation method for scale operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
    Bicubic,
    Lanczos3,
}

impl Interpolation {
    pub fn name(&self) -> &'static str {
        match self {
            Interpolation::Nearest  => "Nearest",
            Interpolation::Bilinear => "Bilinear",
            Interpolation::Bicubic  => "Bicubic",
            Interpolation::Lanczos3 => "Lanczos3",
        }
    }

    pub fn all() -> &'static [Interpolation] {
        &[
            Interpolation::Nearest,
            Interpolation::Bilinear,
            Interpolation::Bicubic,
            Interpolation::Lanczos3,
        ]
    }

    pub fn to_filter(&self) -> imageops::FilterType {
        match self {
            Interpolation::Nearest  => imageops::FilterType::Nearest,
            Interpolation::Bilinear => imageops::FilterType::Triangle,
            Interpolation::Bicubic  => imageops::FilterType::CatmullRom,
            Interpolation::Lanczos3 => imageops::FilterType::Lanczos3,
        }
    }
}

/// Where the old content sits inside a resized canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Anchor {
    #[default]
    Center,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Anchor {
    /// Parse `center`, `top-left`, `top-right`, `bottom-left` or
    /// `bottom-right`. Anything else falls back to `Center`.
    pub fn parse(name: &str) -> Anchor {
        match name.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "center" | "centre" => Anchor::Center,
            "top-left" => Anchor::TopLeft,
            "top-right" => Anchor::TopRight,
            "bottom-left" => Anchor::BottomLeft,
            "bottom-right" => Anchor::BottomRight,
            other => {
                log::warn!("unknown resize anchor `{}`, using center", other);
                Anchor::Center
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Anchor::Center => "center",
            Anchor::TopLeft => "top-left",
            Anchor::TopRight => "top-right",
            Anchor::BottomLeft => "bottom-left",
            Anchor::BottomRight => "bottom-right",
        }
    }

    /// Position of the old canvas's top-left corner inside the new one.
    /// Centering rounds toward negative infinity.
    pub fn offset(&self, old_w: u32, old_h: u32, new_w: u32, new_h: u32) -> (i64, i64) {
        let dw = new_w as i64 - old_w as i64;
        let dh = new_h as i64 - old_h as i64;
        match self {
            Anchor::Center => (dw.div_euclid(2), dh.div_euclid(2)),
            Anchor::TopLeft => (0, 0),
            Anchor::TopRight => (dw, 0),
            Anchor::BottomLeft => (0, dh),
            Anchor::BottomRight => (dw, dh),
        }
    }
}

/// Clip a rectangle to a `width x height` canvas. `None` when nothing is left.
pub fn clip_rect(width: u32, height: u32, x: u32, y: u32, w: u32, h: u32) -> Option<(u32, u32, u32, u32)> {
    if x >= width || y >= height {
        return None;
    }
    let w = w.min(width - x);
    let h = h.min(height - y);
    if w == 0 || h == 0 {
        return None;
    }
    Some((x, y, w, h))
}

/// New pixel buffer and mask for a layer laid onto a `width x height` canvas
/// with its old top-left at `(dx, dy)`. New pixel area is `background`, new
/// mask area is 0. Zero overlap is not an error.
pub fn relaid_layer(
    layer: &Layer,
    width: u32,
    height: u32,
    dx: i64,
    dy: i64,
    background: Rgba<u8>,
) -> Result<(RasterBuffer, Option<GrayImage>)> {
    let mut pixels = RasterBuffer::filled(width, height, background)?;
    pixels.paste(layer.pixels(), dx, dy);
    let mask = match layer.mask() {
        Some(old) => {
            let mut mask = try_gray(width, height, 0)?;
            imageops::replace(&mut mask, old, dx, dy);
            Some(mask)
        }
        None => None,
    };
    Ok((pixels, mask))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_offset_floors() {
        assert_eq!(Anchor::Center.offset(10, 10, 13, 7), (1, -2));
        assert_eq!(Anchor::BottomRight.offset(10, 10, 4, 12), (-6, 2));
        assert_eq!(Anchor::parse("Top_Right"), Anchor::TopRight);
        assert_eq!(Anchor::parse("middle"), Anchor::Center);
    }

    #[test]
    fn clip_rect_handles_edges() {
        assert_eq!(clip_rect(10, 10, 8, 8, 5, 5), Some((8, 8, 2, 2)));
        assert_eq!(clip_rect(10, 10, 10, 0, 1, 1), None);
        assert_eq!(clip_rect(10, 10, 0, 0, 0, 4), None);
    }

    #[test]
    fn relaid_mask_gets_zero_border() {
        let mut layer = Layer::new("a", 2, 2).unwrap();
        layer.set_mask(Some(GrayImage::from_pixel(2, 2, image::Luma([200]))));
        let (pixels, mask) = relaid_layer(&layer, 4, 4, 1, 1, Rgba([1, 1, 1, 1])).unwrap();
        let mask = mask.unwrap();
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);
        assert_eq!(mask.get_pixel(1, 1).0[0], 200);
        assert_eq!(pixels.get(0, 0), Some(Rgba([1, 1, 1, 1])));
        assert_eq!(pixels.get(2, 2), Some(Rgba([0, 0, 0, 0])));
    }
}
