//! Pixel-format conversion between packed RGB layouts and NV12.
//!
//! Full-range BT.601 coefficients in 16.16 fixed point. Chroma is subsampled by
//! averaging each 2x2 block; odd edges reuse the last row/column.

use bytes::Bytes;

use crate::error::CodecError;
use crate::frame::{PixelFormat, VideoFrame};

const FIX: i32 = 16;
const HALF: i32 = 1 << (FIX - 1);

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[inline]
fn rgb_to_y(r: i32, g: i32, b: i32) -> u8 {
    clamp_u8((19595 * r + 38470 * g + 7471 * b + HALF) >> FIX)
}

#[inline]
fn rgb_to_uv(r: i32, g: i32, b: i32) -> (u8, u8) {
    let u = (-11059 * r - 21709 * g + 32768 * b + HALF) >> FIX;
    let v = (32768 * r - 27439 * g - 5329 * b + HALF) >> FIX;
    (clamp_u8(u + 128), clamp_u8(v + 128))
}

#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y = (y as i32) << FIX;
    let u = u as i32 - 128;
    let v = v as i32 - 128;
    let r = (y + 91881 * v + HALF) >> FIX;
    let g = (y - 22554 * u - 46802 * v + HALF) >> FIX;
    let b = (y + 116130 * u + HALF) >> FIX;
    (clamp_u8(r), clamp_u8(g), clamp_u8(b))
}

/// Channel offsets (r, g, b) inside one packed pixel.
fn rgb_offsets(format: PixelFormat) -> Option<(usize, usize, usize)> {
    match format {
        PixelFormat::Bgr24 | PixelFormat::Bgra => Some((2, 1, 0)),
        PixelFormat::Rgb24 => Some((0, 1, 2)),
        PixelFormat::Nv12 => None,
    }
}

/// Converts a packed RGB-family frame to NV12. NV12 input is passed through.
pub fn to_nv12(frame: &VideoFrame) -> Result<VideoFrame, CodecError> {
    frame.validate()?;
    if frame.format == PixelFormat::Nv12 {
        return Ok(frame.clone());
    }
    let (ro, go, bo) = rgb_offsets(frame.format).ok_or_else(|| CodecError::UnsupportedFormat {
        format: frame.format,
        detail: "no conversion to nv12".to_string(),
    })?;
    let bpp = frame.format.packed_bytes_per_pixel().unwrap_or(3);
    let (w, h) = (frame.width as usize, frame.height as usize);
    let src = &frame.data[..];
    let stride = w * bpp;

    let mut out = vec![0u8; PixelFormat::Nv12.frame_size(frame.width, frame.height)];
    let (y_plane, uv_plane) = out.split_at_mut(w * h);

    for row in 0..h {
        let line = &src[row * stride..(row + 1) * stride];
        for col in 0..w {
            let px = &line[col * bpp..];
            y_plane[row * w + col] = rgb_to_y(px[ro] as i32, px[go] as i32, px[bo] as i32);
        }
    }

    let cw = w.div_ceil(2);
    for crow in 0..h.div_ceil(2) {
        for ccol in 0..cw {
            let (mut r, mut g, mut b) = (0i32, 0i32, 0i32);
            for dy in 0..2 {
                let row = (crow * 2 + dy).min(h - 1);
                for dx in 0..2 {
                    let col = (ccol * 2 + dx).min(w - 1);
                    let px = &src[row * stride + col * bpp..];
                    r += px[ro] as i32;
                    g += px[go] as i32;
                    b += px[bo] as i32;
                }
            }
            let (u, v) = rgb_to_uv((r + 2) / 4, (g + 2) / 4, (b + 2) / 4);
            let at = crow * cw * 2 + ccol * 2;
            uv_plane[at] = u;
            uv_plane[at + 1] = v;
        }
    }

    Ok(VideoFrame {
        data: Bytes::from(out),
        width: frame.width,
        height: frame.height,
        format: PixelFormat::Nv12,
        pts: frame.pts,
    })
}

/// Converts an NV12 frame to a packed RGB-family format.
pub fn nv12_to_packed(frame: &VideoFrame, target: PixelFormat) -> Result<VideoFrame, CodecError> {
    if target == PixelFormat::Nv12 {
        frame.nv12_planes()?;
        return Ok(frame.clone());
    }
    let (ro, go, bo) = rgb_offsets(target).ok_or_else(|| CodecError::UnsupportedFormat {
        format: target,
        detail: "no conversion from nv12".to_string(),
    })?;
    let bpp = target.packed_bytes_per_pixel().unwrap_or(3);
    let (y_plane, uv_plane) = frame.nv12_planes()?;
    let (w, h) = (frame.width as usize, frame.height as usize);
    let cw = w.div_ceil(2);

    let mut out = vec![0u8; target.frame_size(frame.width, frame.height)];
    for row in 0..h {
        for col in 0..w {
            let at = (row / 2) * cw * 2 + (col / 2) * 2;
            let (r, g, b) = yuv_to_rgb(y_plane[row * w + col], uv_plane[at], uv_plane[at + 1]);
            let px = &mut out[(row * w + col) * bpp..];
            px[ro] = r;
            px[go] = g;
            px[bo] = b;
            if bpp == 4 {
                px[3] = 255;
            }
        }
    }

    Ok(VideoFrame {
        data: Bytes::from(out),
        width: frame.width,
        height: frame.height,
        format: target,
        pts: frame.pts,
    })
}

/// Converts frames into one fixed output geometry and format.
///
/// No resampling is done: a frame whose dimensions differ from the target is
/// rejected with [`CodecError::InvalidFrame`].
pub struct Scaler {
    format: PixelFormat,
    width: u32,
    height: u32,
}

impl Scaler {
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
        }
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn run(&mut self, frame: &VideoFrame) -> Result<VideoFrame, CodecError> {
        if frame.width != self.width || frame.height != self.height {
            return Err(CodecError::InvalidFrame(format!(
                "frame is {}x{}, scaler expects {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        match (frame.format, self.format) {
            (src, dst) if src == dst => {
                frame.validate()?;
                Ok(frame.clone())
            }
            (_, PixelFormat::Nv12) => to_nv12(frame),
            (PixelFormat::Nv12, dst) => nv12_to_packed(frame, dst),
            (src, dst) => {
                let nv12 = to_nv12(frame)?;
                nv12_to_packed(&nv12, dst).map_err(|_| CodecError::UnsupportedFormat {
                    format: src,
                    detail: format!("no conversion to {}", dst),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(format: PixelFormat, w: u32, h: u32, rgb: (u8, u8, u8)) -> VideoFrame {
        let bpp = format.packed_bytes_per_pixel().unwrap();
        let (ro, go, bo) = rgb_offsets(format).unwrap();
        let mut data = vec![0u8; format.frame_size(w, h)];
        for px in data.chunks_mut(bpp) {
            px[ro] = rgb.0;
            px[go] = rgb.1;
            px[bo] = rgb.2;
            if bpp == 4 {
                px[3] = 255;
            }
        }
        VideoFrame::new(data, w, h, format)
    }

    fn assert_close(a: u8, b: u8) {
        assert!((a as i32 - b as i32).abs() <= 2, "{} vs {}", a, b);
    }

    #[test]
    fn test_gray_maps_to_neutral_chroma() {
        let frame = solid(PixelFormat::Bgr24, 4, 4, (128, 128, 128));
        let nv12 = to_nv12(&frame).unwrap();
        let (y, uv) = nv12.nv12_planes().unwrap();
        assert!(y.iter().all(|&v| v == 128));
        assert!(uv.iter().all(|&v| v == 128));
    }

    #[test]
    fn test_solid_colors_round_trip() {
        for rgb in [(255, 0, 0), (0, 255, 0), (0, 0, 255), (200, 100, 50)] {
            let frame = solid(PixelFormat::Bgr24, 6, 4, rgb);
            let nv12 = to_nv12(&frame).unwrap();
            assert_eq!(nv12.format, PixelFormat::Nv12);
            assert_eq!(nv12.data.len(), 6 * 4 * 3 / 2);

            let back = nv12_to_packed(&nv12, PixelFormat::Rgb24).unwrap();
            for px in back.data.chunks(3) {
                assert_close(px[0], rgb.0);
                assert_close(px[1], rgb.1);
                assert_close(px[2], rgb.2);
            }
        }
    }

    #[test]
    fn test_bgra_input_and_odd_size() {
        let frame = solid(PixelFormat::Bgra, 3, 3, (10, 20, 30)).with_pts(7);
        let nv12 = to_nv12(&frame).unwrap();
        assert_eq!(nv12.data.len(), 9 + 8);
        assert_eq!(nv12.pts, Some(7));
        let back = nv12_to_packed(&nv12, PixelFormat::Bgra).unwrap();
        assert_eq!(back.data.len(), 36);
        assert_eq!(back.data[3], 255);
    }

    #[test]
    fn test_scaler_rejects_dimension_mismatch() {
        let mut scaler = Scaler::new(PixelFormat::Nv12, 8, 8);
        let frame = solid(PixelFormat::Bgr24, 4, 4, (0, 0, 0));
        assert!(matches!(
            scaler.run(&frame),
            Err(CodecError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_scaler_packed_to_packed() {
        let mut scaler = Scaler::new(PixelFormat::Rgb24, 2, 2);
        let frame = solid(PixelFormat::Bgr24, 2, 2, (0, 0, 255));
        let out = scaler.run(&frame).unwrap();
        assert_eq!(out.format, PixelFormat::Rgb24);
        assert_close(out.data[2], 255);
    }
}
