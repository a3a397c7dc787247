use ffmpeg_next::format::Pixel;

use crate::{
    decoder::{DecoderSettings, VideoDecoder},
    error::CodecError,
    frame::{PixelFormat, VideoFrame},
};

use super::av_frame_to_frame;

pub struct FfmpegDecoder {
    name: String,
    inner: ffmpeg_next::codec::decoder::Video,
    // decoders that do not output NV12 (e.g. software h264 -> yuv420p)
    converter: Option<ffmpeg_next::software::scaling::Context>,
}

unsafe impl Send for FfmpegDecoder {}

impl FfmpegDecoder {
    pub fn new(settings: &DecoderSettings) -> Result<Self, CodecError> {
        let codec = ffmpeg_next::decoder::find_by_name(&settings.codec)
            .ok_or_else(|| CodecError::NotFound(settings.codec.clone()))?;
        let mut context = ffmpeg_next::codec::Context::new_with_codec(codec);
        unsafe {
            let ctx = context.as_mut_ptr();
            (*ctx).time_base = ffmpeg_next::Rational::from(settings.time_base()).into();
            (*ctx).framerate = ffmpeg_next::Rational::new(settings.frame_rate as i32, 1).into();
            (*ctx).width = settings.width as i32;
            (*ctx).height = settings.height as i32;
            (*ctx).pix_fmt = Pixel::NV12.into();
        }
        let decoder = context.decoder().video()?;

        log::info!("decoder {} opened", settings.codec);
        Ok(Self {
            name: settings.codec.clone(),
            inner: decoder,
            converter: None,
        })
    }

    fn to_nv12(&mut self, frame: ffmpeg_next::frame::Video) -> Result<VideoFrame, CodecError> {
        if frame.format() == Pixel::NV12 {
            return Ok(av_frame_to_frame(&frame, PixelFormat::Nv12));
        }
        if self.converter.is_none() {
            self.converter = Some(ffmpeg_next::software::scaling::Context::get(
                frame.format(),
                frame.width(),
                frame.height(),
                Pixel::NV12,
                frame.width(),
                frame.height(),
                ffmpeg_next::software::scaling::flag::Flags::BILINEAR,
            )?);
        }
        let mut converted = ffmpeg_next::frame::Video::empty();
        if let Some(converter) = self.converter.as_mut() {
            converter.run(&frame, &mut converted)?;
        }
        converted.set_pts(frame.pts());
        let out = av_frame_to_frame(&converted, PixelFormat::Nv12);
        out.validate()?;
        Ok(out)
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn send_packet(
        &mut self,
        data: &[u8],
        pts: Option<i64>,
        dts: Option<i64>,
    ) -> Result<(), CodecError> {
        let mut packet = ffmpeg_next::codec::packet::Packet::copy(data);
        packet.set_pts(pts);
        packet.set_dts(dts);
        self.inner.send_packet(&packet)?;
        Ok(())
    }

    fn send_eof(&mut self) -> Result<(), CodecError> {
        self.inner.send_eof()?;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Option<VideoFrame>, CodecError> {
        let mut frame = ffmpeg_next::frame::Video::empty();
        match self.inner.receive_frame(&mut frame) {
            Ok(()) => {
                if frame.pts().is_none() {
                    frame.set_pts(frame.timestamp());
                }
                self.to_nv12(frame).map(Some)
            }
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(ffmpeg_next::Error::Other { errno })
                if errno == ffmpeg_next::util::error::EAGAIN =>
            {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}
