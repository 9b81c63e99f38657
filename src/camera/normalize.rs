use crate::error::{CaptureError, Result};

/// Pixel layouts a camera stream may deliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Nv12,
    Yuyv,
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    match format {
        PixelFormat::Rgb24 => {
            let expected = frame_len(width, height, 3, 1)?;
            if pixels.len() != expected {
                return Err(CaptureError::device(format!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                )));
            }
            Ok(pixels.to_vec())
        }
        PixelFormat::Nv12 => nv12_to_rgb(pixels, width, height),
        PixelFormat::Yuyv => yuyv_to_rgb(pixels, width, height),
    }
}

fn frame_len(width: u32, height: u32, num: usize, den: usize) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(num))
        .map(|v| v / den)
        .ok_or_else(|| CaptureError::device("frame dimensions overflow"))
}

fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = frame_len(width, height, 1, 1)?;
    let expected = frame_len(width, height, 3, 2)?;
    if pixels.len() != expected {
        return Err(CaptureError::device(format!(
            "NV12 frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        )));
    }

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i];
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let offset = (j * w + i) * 3;
            write_rgb(
                &mut rgb[offset..offset + 3],
                y,
                pixels[uv_index],
                pixels[uv_index + 1],
            );
        }
    }

    Ok(rgb)
}

// Packed 4:2:2, two pixels per Y0 U Y1 V quad.
fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected = frame_len(width, height, 2, 1)?;
    if width % 2 != 0 || pixels.len() != expected {
        return Err(CaptureError::device(format!(
            "YUYV frame length mismatch: expected {} (even width), got {}",
            expected,
            pixels.len()
        )));
    }

    let mut rgb = vec![0u8; frame_len(width, height, 3, 1)?];
    for (quad, out) in pixels.chunks_exact(4).zip(rgb.chunks_exact_mut(6)) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        write_rgb(&mut out[..3], y0, u, v);
        write_rgb(&mut out[3..], y1, u, v);
    }
    Ok(rgb)
}

fn write_rgb(out: &mut [u8], y: u8, u: u8, v: u8) {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;

    let r = y + 1.402_f32 * v;
    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = y + 1.772_f32 * u;

    out[0] = clamp_to_u8(r);
    out[1] = clamp_to_u8(g);
    out[2] = clamp_to_u8(b);
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_conversion_produces_gray() -> Result<()> {
        let nv12 = [vec![128u8; 4], vec![128u8; 2]].concat();
        let rgb = normalize_to_rgb(&nv12, 2, 2, PixelFormat::Nv12)?;
        assert_eq!(rgb, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn yuyv_conversion_produces_gray() -> Result<()> {
        let yuyv = vec![128u8; 8];
        let rgb = normalize_to_rgb(&yuyv, 2, 2, PixelFormat::Yuyv)?;
        assert_eq!(rgb, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn rgb_pass_through_validates_length() {
        assert!(normalize_to_rgb(&[1u8; 9], 1, 3, PixelFormat::Rgb24).is_ok());
        let err = normalize_to_rgb(&[1u8; 8], 1, 3, PixelFormat::Rgb24).unwrap_err();
        assert!(matches!(err, CaptureError::Device(_)));
    }
}
