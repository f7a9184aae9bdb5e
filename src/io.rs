//! Decoding files into raster buffers and encoding composites.
//!
//! Everything that enters the engine is promoted to RGBA8 first, so images
//! without alpha arrive fully opaque.

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageFormat, ImageOutputFormat};

use crate::canvas::{Layer, LayerStack, RasterBuffer};
use crate::error::{EngineError, Result};

/// Largest width or height accepted from a file.
pub const MAX_CANVAS_DIM: u32 = 32_768;

fn check_dims(width: u32, height: u32) -> Result<()> {
    if width > MAX_CANVAS_DIM || height > MAX_CANVAS_DIM {
        log::warn!(
            "refusing {}x{} image, limit is {}x{}",
            width,
            height,
            MAX_CANVAS_DIM,
            MAX_CANVAS_DIM
        );
        return Err(EngineError::Allocation { width, height });
    }
    Ok(())
}

fn from_dynamic(img: DynamicImage) -> Result<RasterBuffer> {
    check_dims(img.width(), img.height())?;
    Ok(RasterBuffer::from_image(img.to_rgba8()))
}

/// Decode any supported image file to RGBA8.
pub fn load_raster(path: &Path) -> Result<RasterBuffer> {
    let buffer = from_dynamic(image::open(path)?)?;
    log::info!("Loaded {} ({}x{})", path.display(), buffer.width(), buffer.height());
    Ok(buffer)
}

/// Decode an in-memory encoded image to RGBA8.
pub fn decode_raster(bytes: &[u8]) -> Result<RasterBuffer> {
    from_dynamic(image::load_from_memory(bytes)?)
}

fn layer_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Background")
        .to_string()
}

/// Open an image file as a single-layer document sized to the image.
pub fn open_document(path: &Path) -> Result<LayerStack> {
    Ok(LayerStack::from_buffer(layer_name(path), load_raster(path)?))
}

/// Add an image file as a new layer above the active one. The layer keeps
/// the image's own size.
pub fn import_layer(stack: &mut LayerStack, path: &Path) -> Result<usize> {
    let layer = Layer::from_buffer(layer_name(path), load_raster(path)?);
    let position = stack.active_index().map(|i| i + 1);
    Ok(stack.add(layer, position))
}

/// Render the stack and write it in the format implied by the extension.
/// Formats without alpha (JPEG) receive the RGB channels only.
pub fn save_composite(stack: &LayerStack, path: &Path) -> Result<()> {
    let flat = stack.render()?.into_image();
    let format = ImageFormat::from_path(path)?;
    match format {
        ImageFormat::Jpeg | ImageFormat::Bmp => DynamicImage::ImageRgba8(flat).to_rgb8().save_with_format(path, format)?,
        _ => flat.save_with_format(path, format)?,
    }
    log::info!("Saved composite to {}", path.display());
    Ok(())
}

/// Encode a buffer as PNG bytes.
pub fn encode_png(buffer: &RasterBuffer) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(buffer.as_image().clone()).write_to(&mut out, ImageOutputFormat::Png)?;
    Ok(out.into_inner())
}
