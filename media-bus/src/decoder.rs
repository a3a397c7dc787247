use crate::{
    error::CodecError,
    frame::{PixelFormat, VideoFrame},
    packet::Rational,
    raw::RawVideoDecoder,
};

/// A video decoder. The payload is borrowed: implementations copy what they
/// keep, so callers may reuse their receive buffer for the next packet.
pub trait VideoDecoder: Send {
    fn name(&self) -> &str;

    fn send_packet(
        &mut self,
        data: &[u8],
        pts: Option<i64>,
        dts: Option<i64>,
    ) -> Result<(), CodecError>;

    fn send_eof(&mut self) -> Result<(), CodecError>;

    /// Next reconstructed frame, or `None` when more input is needed.
    fn receive_frame(&mut self) -> Result<Option<VideoFrame>, CodecError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderSettings {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub pixel_format: PixelFormat,
}

impl DecoderSettings {
    pub fn time_base(&self) -> Rational {
        Rational::new(1, self.frame_rate.max(1) as i32)
    }
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            codec: "rawvideo".to_string(),
            width: 1920,
            height: 1080,
            frame_rate: 30,
            pixel_format: PixelFormat::Nv12,
        }
    }
}

pub fn open_decoder(settings: &DecoderSettings) -> Result<Box<dyn VideoDecoder>, CodecError> {
    match settings.codec.as_str() {
        "rawvideo" => Ok(Box::new(RawVideoDecoder::new(settings)?)),
        #[cfg(feature = "ffmpeg")]
        _ => Ok(Box::new(crate::ffmpeg::FfmpegDecoder::new(settings)?)),
        #[cfg(not(feature = "ffmpeg"))]
        other => Err(CodecError::NotFound(other.to_string())),
    }
}
