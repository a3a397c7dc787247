//! Media collaborators for the camstream pipeline: frames, packets, pixel
//! conversion, codecs, muxers and cameras.
//!
//! Everything here is usable without FFmpeg. The `ffmpeg` feature adds
//! FFmpeg-backed implementations of the same traits under [`ffmpeg`].

/// Registers FFmpeg components (format, device, etc.). Call once at startup
/// before opening FFmpeg encoders, muxers or device cameras. A no-op when the
/// `ffmpeg` feature is disabled.
pub fn init() -> anyhow::Result<()> {
    #[cfg(feature = "ffmpeg")]
    {
        ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))?;
        ffmpeg_next::util::log::set_level(ffmpeg_next::util::log::Level::Verbose);
    }
    Ok(())
}

pub mod decoder;
pub mod device;
pub mod encoder;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod frame;
pub mod output;
pub mod packet;
pub mod raw;
pub mod scaler;

pub use decoder::{DecoderSettings, VideoDecoder, open_decoder};
pub use device::{Camera, TestPatternCamera};
pub use encoder::{EncoderSettings, VideoEncoder, open_encoder};
pub use error::{CodecError, DeviceError};
pub use frame::{PixelFormat, VideoFrame};
pub use output::{Muxer, MuxerStream, open_muxer};
pub use packet::{Packet, Rational};
