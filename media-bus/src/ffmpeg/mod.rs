//! FFmpeg-backed collaborators (feature `ffmpeg`).

mod decoder;
mod encoder;
mod input;
mod output;

pub use decoder::FfmpegDecoder;
pub use encoder::FfmpegEncoder;
pub use input::DeviceCamera;
pub use output::ContainerWriter;

use bytes::BytesMut;
use ffmpeg_next::format::Pixel;

use crate::{
    error::CodecError,
    frame::{PixelFormat, VideoFrame},
};

pub(crate) fn to_ffmpeg_pixel(format: PixelFormat) -> Pixel {
    match format {
        PixelFormat::Bgr24 => Pixel::BGR24,
        PixelFormat::Rgb24 => Pixel::RGB24,
        PixelFormat::Bgra => Pixel::BGRA,
        PixelFormat::Nv12 => Pixel::NV12,
    }
}

/// Copies a tightly packed NV12 frame into an FFmpeg frame with its own strides.
pub(crate) fn nv12_to_av_frame(frame: &VideoFrame) -> Result<ffmpeg_next::frame::Video, CodecError> {
    let (y, uv) = frame.nv12_planes()?;
    let (w, h) = (frame.width as usize, frame.height as usize);
    let mut out = ffmpeg_next::frame::Video::new(Pixel::NV12, frame.width, frame.height);

    copy_plane(y, w, h, &mut out, 0);
    copy_plane(uv, w.div_ceil(2) * 2, h.div_ceil(2), &mut out, 1);
    out.set_pts(frame.pts);
    Ok(out)
}

fn copy_plane(src: &[u8], row_len: usize, rows: usize, dst: &mut ffmpeg_next::frame::Video, plane: usize) {
    let stride = dst.stride(plane);
    let data = dst.data_mut(plane);
    for row in 0..rows {
        data[row * stride..row * stride + row_len]
            .copy_from_slice(&src[row * row_len..(row + 1) * row_len]);
    }
}

/// Packs the planes of an FFmpeg frame (NV12 or a packed RGB layout) into a
/// tight buffer.
pub(crate) fn av_frame_to_frame(
    frame: &ffmpeg_next::frame::Video,
    format: PixelFormat,
) -> VideoFrame {
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let planes: Vec<(usize, usize)> = match format.packed_bytes_per_pixel() {
        Some(bpp) => vec![(w * bpp, h)],
        None => vec![(w, h), (w.div_ceil(2) * 2, h.div_ceil(2))],
    };

    let mut out = BytesMut::with_capacity(format.frame_size(frame.width(), frame.height()));
    for (plane, (row_len, rows)) in planes.into_iter().enumerate() {
        let stride = frame.stride(plane);
        let data = frame.data(plane);
        for row in 0..rows {
            out.extend_from_slice(&data[row * stride..row * stride + row_len]);
        }
    }

    VideoFrame {
        data: out.freeze(),
        width: frame.width(),
        height: frame.height(),
        format,
        pts: frame.pts(),
    }
}
