//! Conversion of camera pixel formats to packed RGB24.

use anyhow::{anyhow, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
    Nv12,
}

impl PixelFormat {
    /// Map a V4L2 fourcc to a supported format.
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"NV12" => Some(PixelFormat::Nv12),
            _ => None,
        }
    }
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let area = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    match format {
        PixelFormat::Rgb24 => {
            let data = exact(pixels, area * 3, "RGB")?;
            Ok(data.to_vec())
        }
        PixelFormat::Yuyv => yuyv_to_rgb(exact(pixels, area * 2, "YUYV")?, w, h),
        PixelFormat::Nv12 => nv12_to_rgb(exact(pixels, area + area / 2, "NV12")?, w, h),
    }
}

// Drivers may pad the mapped buffer; anything shorter is an error.
fn exact<'a>(pixels: &'a [u8], expected: usize, name: &str) -> Result<&'a [u8]> {
    pixels.get(..expected).ok_or_else(|| {
        anyhow!(
            "{} frame length mismatch: expected {}, got {}",
            name,
            expected,
            pixels.len()
        )
    })
}

fn yuyv_to_rgb(pixels: &[u8], w: usize, h: usize) -> Result<Vec<u8>> {
    if w % 2 != 0 {
        return Err(anyhow!("YUYV frames need an even width, got {}", w));
    }
    let mut rgb = Vec::with_capacity(w * h * 3);
    for quad in pixels.chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0], quad[2]] {
            rgb.extend_from_slice(&yuv_pixel(y as f32, u, v));
        }
    }
    Ok(rgb)
}

fn nv12_to_rgb(pixels: &[u8], w: usize, h: usize) -> Result<Vec<u8>> {
    let y_plane = w * h;
    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;
            let offset = (j * w + i) * 3;
            rgb[offset..offset + 3].copy_from_slice(&yuv_pixel(y, u, v));
        }
    }
    Ok(rgb)
}

fn yuv_pixel(y: f32, u: f32, v: f32) -> [u8; 3] {
    [
        clamp_to_u8(y + 1.402_f32 * v),
        clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v),
        clamp_to_u8(y + 1.772_f32 * u),
    ]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_chroma_gives_gray() -> Result<()> {
        let nv12 = [vec![128u8; 4], vec![128u8; 2]].concat();
        assert_eq!(normalize_to_rgb(&nv12, 2, 2, PixelFormat::Nv12)?, vec![128u8; 12]);

        let yuyv = vec![90u8, 128, 90, 128];
        assert_eq!(normalize_to_rgb(&yuyv, 2, 1, PixelFormat::Yuyv)?, vec![90u8; 6]);
        Ok(())
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(normalize_to_rgb(&[0u8; 5], 1, 2, PixelFormat::Rgb24).is_err());
        assert!(normalize_to_rgb(&[0u8; 3], 2, 1, PixelFormat::Yuyv).is_err());
    }

    #[test]
    fn padded_rgb_is_truncated() -> Result<()> {
        let pixels = vec![1u8; 12];
        assert_eq!(normalize_to_rgb(&pixels, 1, 3, PixelFormat::Rgb24)?, vec![1u8; 9]);
        Ok(())
    }

    #[test]
    fn fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
    }
}
