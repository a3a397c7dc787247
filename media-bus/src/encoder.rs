use bytes::Bytes;

use crate::{
    error::CodecError,
    frame::{PixelFormat, VideoFrame},
    packet::{Packet, Rational},
    raw::RawVideoEncoder,
};

/// A video encoder. Frames go in with their presentation timestamp already set;
/// a single frame may yield zero or more packets.
pub trait VideoEncoder: Send {
    fn name(&self) -> &str;

    /// Time base of the timestamps on submitted frames and emitted packets.
    fn time_base(&self) -> Rational;

    /// Out-of-band codec configuration (e.g. SPS/PPS) a container needs in
    /// its header.
    fn extradata(&self) -> Option<Bytes> {
        None
    }

    fn send_frame(&mut self, frame: &VideoFrame) -> Result<(), CodecError>;

    fn send_eof(&mut self) -> Result<(), CodecError>;

    /// Next ready packet, or `None` when the encoder needs more input (or has
    /// been fully drained after EOF).
    fn receive_packet(&mut self) -> Result<Option<Packet>, CodecError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    /// bit/s
    pub bitrate: u64,
    pub gop_size: u32,
    pub pixel_format: PixelFormat,
    pub preset: Option<String>,
    pub tune: Option<String>,
    pub split_encode_mode: Option<String>,
    /// Emit codec configuration out of band instead of in the bitstream.
    /// Needed by containers like mp4, wrong for raw streams sent on the wire.
    pub global_header: bool,
}

impl EncoderSettings {
    pub fn time_base(&self) -> Rational {
        Rational::new(1, self.frame_rate.max(1) as i32)
    }

    pub fn frame_rate(&self) -> Rational {
        Rational::new(self.frame_rate.max(1) as i32, 1)
    }

    /// Private codec options in the order they are applied.
    pub fn private_options(&self) -> Vec<(&'static str, &str)> {
        [
            ("preset", &self.preset),
            ("tune", &self.tune),
            ("split_encode_mode", &self.split_encode_mode),
        ]
        .into_iter()
        .filter_map(|(key, value)| match value.as_deref() {
            Some(v) if !v.is_empty() => Some((key, v)),
            _ => None,
        })
        .collect()
    }
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            codec: "rawvideo".to_string(),
            width: 1920,
            height: 1080,
            frame_rate: 30,
            bitrate: 8 * 1024 * 1024,
            gop_size: 30,
            pixel_format: PixelFormat::Nv12,
            preset: None,
            tune: None,
            split_encode_mode: None,
            global_header: false,
        }
    }
}

/// Opens the encoder named in `settings`. `rawvideo` is always available; other
/// names need the `ffmpeg` feature.
pub fn open_encoder(settings: &EncoderSettings) -> Result<Box<dyn VideoEncoder>, CodecError> {
    if settings.width == 0 || settings.height == 0 || settings.frame_rate == 0 {
        return Err(CodecError::InvalidFrame(format!(
            "invalid encoder geometry {}x{}@{}",
            settings.width, settings.height, settings.frame_rate
        )));
    }
    match settings.codec.as_str() {
        "rawvideo" => Ok(Box::new(RawVideoEncoder::new(settings)?)),
        #[cfg(feature = "ffmpeg")]
        _ => Ok(Box::new(crate::ffmpeg::FfmpegEncoder::new(settings)?)),
        #[cfg(not(feature = "ffmpeg"))]
        other => Err(CodecError::NotFound(other.to_string())),
    }
}
