//! Fixed-size raster surface for camera snapshots.
//!
//! Every snapshot is drawn into a 640×480 RGB surface, stretched to its full
//! extent regardless of the source aspect ratio, and PNG-encoded.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbImage};

use super::Frame;
use crate::error::{CaptureError, Result};

pub const SURFACE_WIDTH: u32 = 640;
pub const SURFACE_HEIGHT: u32 = 480;

/// Draw `frame` into the fixed surface.
pub fn rasterize(frame: &Frame) -> Result<RgbImage> {
    let rgb = frame.to_rgb()?;
    let image = RgbImage::from_raw(frame.width, frame.height, rgb).ok_or_else(|| {
        CaptureError::device(format!(
            "frame buffer does not match {}x{}",
            frame.width, frame.height
        ))
    })?;
    if image.width() == SURFACE_WIDTH && image.height() == SURFACE_HEIGHT {
        return Ok(image);
    }
    Ok(imageops::resize(
        &image,
        SURFACE_WIDTH,
        SURFACE_HEIGHT,
        FilterType::Triangle,
    ))
}

/// PNG-encode a raster.
pub fn encode_png(surface: &RgbImage) -> std::result::Result<Vec<u8>, image::ImageError> {
    let mut out = Cursor::new(Vec::new());
    surface.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

/// Rasterize and encode in one step.
pub fn snapshot_png(frame: &Frame) -> Result<Vec<u8>> {
    let surface = rasterize(frame)?;
    encode_png(&surface).map_err(|e| CaptureError::device(format!("encode snapshot: {}", e)))
}
