use std::time::Duration;

use thiserror::Error;

use crate::frame::PixelFormat;

/// The codec collaborator rejected a frame or packet, or could not be opened.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("codec not found: {0}")]
    NotFound(String),

    #[error("unsupported pixel format {format} ({detail})")]
    UnsupportedFormat { format: PixelFormat, detail: String },

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("unsupported container: {0}")]
    UnsupportedContainer(String),

    #[error("codec already flushed")]
    Flushed,

    #[error("muxer io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec backend error: {0}")]
    Backend(String),
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Error> for CodecError {
    fn from(err: ffmpeg_next::Error) -> Self {
        CodecError::Backend(err.to_string())
    }
}

/// Errors reported by a camera collaborator.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no frame within {0:?}")]
    Timeout(Duration),

    #[error("no camera device found")]
    NoDevice,

    #[error("camera is not acquiring")]
    NotStarted,

    #[error("camera backend error: {0}")]
    Backend(String),
}

impl DeviceError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DeviceError::Timeout(_))
    }
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Error> for DeviceError {
    fn from(err: ffmpeg_next::Error) -> Self {
        DeviceError::Backend(err.to_string())
    }
}
