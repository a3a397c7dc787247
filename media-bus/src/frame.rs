use std::fmt::{Display, Formatter};
use std::str::FromStr;

use bytes::Bytes;

use crate::error::CodecError;
use crate::packet::Rational;

/// Pixel layouts understood by the conversion routines and the codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Packed 8-bit B, G, R.
    Bgr24,
    /// Packed 8-bit R, G, B.
    Rgb24,
    /// Packed 8-bit B, G, R, A.
    Bgra,
    /// Y plane followed by an interleaved half-resolution U/V plane.
    Nv12,
}

impl PixelFormat {
    /// Bytes per pixel of a packed format, `None` for planar ones.
    pub fn packed_bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Bgr24 | PixelFormat::Rgb24 => Some(3),
            PixelFormat::Bgra => Some(4),
            PixelFormat::Nv12 => None,
        }
    }

    /// Number of bytes a tightly packed image of this format occupies.
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self.packed_bytes_per_pixel() {
            Some(bpp) => w * h * bpp,
            None => w * h + 2 * w.div_ceil(2) * h.div_ceil(2),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgra => "bgra",
            PixelFormat::Nv12 => "nv12",
        }
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bgr24" | "bgr" => Ok(PixelFormat::Bgr24),
            "rgb24" | "rgb" => Ok(PixelFormat::Rgb24),
            "bgra" => Ok(PixelFormat::Bgra),
            "nv12" => Ok(PixelFormat::Nv12),
            other => Err(CodecError::InvalidFrame(format!(
                "unknown pixel format: {}",
                other
            ))),
        }
    }
}

/// One raw image. The pixel bytes are an immutable `Bytes` view, so cloning a
/// frame or handing it to several consumers never copies pixels.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pts: Option<i64>,
}

impl VideoFrame {
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            format,
            pts: None,
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    /// Checks that the buffer holds exactly one complete image.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.width == 0 || self.height == 0 {
            return Err(CodecError::InvalidFrame(format!(
                "invalid video size {}x{}",
                self.width, self.height
            )));
        }
        let expected = self.format.frame_size(self.width, self.height);
        if self.data.len() != expected {
            return Err(CodecError::InvalidFrame(format!(
                "{} {}x{} needs {} bytes, got {}",
                self.format,
                self.width,
                self.height,
                expected,
                self.data.len()
            )));
        }
        Ok(())
    }

    /// Y plane and interleaved UV plane of an NV12 frame.
    pub fn nv12_planes(&self) -> Result<(&[u8], &[u8]), CodecError> {
        if self.format != PixelFormat::Nv12 {
            return Err(CodecError::UnsupportedFormat {
                format: self.format,
                detail: "expected nv12".to_string(),
            });
        }
        self.validate()?;
        let y_size = self.width as usize * self.height as usize;
        Ok(self.data.split_at(y_size))
    }

    pub fn pts_ms(&self, time_base: Rational) -> Option<i64> {
        self.pts
            .map(|pts| time_base.rescale(pts, Rational::new(1, 1000)))
    }
}

impl Display for VideoFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "VideoFrame data_len: {}, width: {}, height: {}, format: {}, pts: {:?}",
            self.data.len(),
            self.width,
            self.height,
            self.format,
            self.pts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes() {
        assert_eq!(PixelFormat::Bgr24.frame_size(4, 2), 24);
        assert_eq!(PixelFormat::Bgra.frame_size(4, 2), 32);
        assert_eq!(PixelFormat::Nv12.frame_size(4, 2), 12);
        assert_eq!(PixelFormat::Nv12.frame_size(3, 3), 9 + 8);
    }

    #[test]
    fn test_validate_rejects_short_buffer() {
        let frame = VideoFrame::new(vec![0u8; 10], 4, 2, PixelFormat::Bgr24);
        assert!(matches!(frame.validate(), Err(CodecError::InvalidFrame(_))));

        let frame = VideoFrame::new(vec![0u8; 24], 4, 2, PixelFormat::Bgr24);
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn test_pixel_format_parse() {
        assert_eq!("NV12".parse::<PixelFormat>().unwrap(), PixelFormat::Nv12);
        assert_eq!("bgr".parse::<PixelFormat>().unwrap(), PixelFormat::Bgr24);
        assert!("yuyv".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn test_pts_ms() {
        let frame = VideoFrame::new(Bytes::new(), 0, 0, PixelFormat::Nv12).with_pts(45);
        assert_eq!(frame.pts_ms(Rational::new(1, 30)), Some(1500));
    }
}
