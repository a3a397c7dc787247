//! `rawvideo`: an intra-only codec whose packets are the NV12 images verbatim.
//!
//! Useful without FFmpeg, for link tests, and as a lossless reference stream.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::{
    decoder::{DecoderSettings, VideoDecoder},
    encoder::{EncoderSettings, VideoEncoder},
    error::CodecError,
    frame::{PixelFormat, VideoFrame},
    packet::{Packet, Rational},
};

fn check_format(format: PixelFormat) -> Result<(), CodecError> {
    if format != PixelFormat::Nv12 {
        return Err(CodecError::UnsupportedFormat {
            format,
            detail: "rawvideo carries nv12 only".to_string(),
        });
    }
    Ok(())
}

pub struct RawVideoEncoder {
    width: u32,
    height: u32,
    time_base: Rational,
    pending: VecDeque<Packet>,
    eof: bool,
}

impl RawVideoEncoder {
    pub fn new(settings: &EncoderSettings) -> Result<Self, CodecError> {
        check_format(settings.pixel_format)?;
        Ok(Self {
            width: settings.width,
            height: settings.height,
            time_base: settings.time_base(),
            pending: VecDeque::new(),
            eof: false,
        })
    }
}

impl VideoEncoder for RawVideoEncoder {
    fn name(&self) -> &str {
        "rawvideo"
    }

    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn send_frame(&mut self, frame: &VideoFrame) -> Result<(), CodecError> {
        if self.eof {
            return Err(CodecError::Flushed);
        }
        check_format(frame.format)?;
        if frame.width != self.width || frame.height != self.height {
            return Err(CodecError::InvalidFrame(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        frame.validate()?;

        let mut packet = Packet::new(frame.data.clone(), self.time_base);
        packet.pts = frame.pts;
        packet.dts = frame.pts;
        packet.duration = 1;
        packet.is_key = true;
        self.pending.push_back(packet);
        Ok(())
    }

    fn send_eof(&mut self) -> Result<(), CodecError> {
        self.eof = true;
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Option<Packet>, CodecError> {
        Ok(self.pending.pop_front())
    }
}

pub struct RawVideoDecoder {
    width: u32,
    height: u32,
    frame_size: usize,
    pending: VecDeque<VideoFrame>,
    eof: bool,
}

impl RawVideoDecoder {
    pub fn new(settings: &DecoderSettings) -> Result<Self, CodecError> {
        check_format(settings.pixel_format)?;
        if settings.width == 0 || settings.height == 0 {
            return Err(CodecError::InvalidFrame(format!(
                "invalid decoder size {}x{}",
                settings.width, settings.height
            )));
        }
        Ok(Self {
            width: settings.width,
            height: settings.height,
            frame_size: PixelFormat::Nv12.frame_size(settings.width, settings.height),
            pending: VecDeque::new(),
            eof: false,
        })
    }
}

impl VideoDecoder for RawVideoDecoder {
    fn name(&self) -> &str {
        "rawvideo"
    }

    fn send_packet(
        &mut self,
        data: &[u8],
        pts: Option<i64>,
        dts: Option<i64>,
    ) -> Result<(), CodecError> {
        if self.eof {
            return Err(CodecError::Flushed);
        }
        if data.len() != self.frame_size {
            return Err(CodecError::InvalidPacket(format!(
                "rawvideo packet of {} bytes, expected {}",
                data.len(),
                self.frame_size
            )));
        }
        let mut frame = VideoFrame::new(
            Bytes::copy_from_slice(data),
            self.width,
            self.height,
            PixelFormat::Nv12,
        );
        frame.pts = pts.or(dts);
        self.pending.push_back(frame);
        Ok(())
    }

    fn send_eof(&mut self) -> Result<(), CodecError> {
        self.eof = true;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Option<VideoFrame>, CodecError> {
        Ok(self.pending.pop_front())
    }
}
