use bytes::Bytes;
use ffmpeg_next::Dictionary;

use crate::{
    encoder::{EncoderSettings, VideoEncoder},
    error::CodecError,
    frame::VideoFrame,
    packet::{Packet, Rational},
};

use super::{nv12_to_av_frame, to_ffmpeg_pixel};

pub struct FfmpegEncoder {
    name: String,
    inner: ffmpeg_next::codec::encoder::Video,
    time_base: Rational,
    extradata: Option<Bytes>,
}

unsafe impl Send for FfmpegEncoder {}

impl FfmpegEncoder {
    pub fn new(settings: &EncoderSettings) -> Result<Self, CodecError> {
        let codec = ffmpeg_next::encoder::find_by_name(&settings.codec)
            .ok_or_else(|| CodecError::NotFound(settings.codec.clone()))?;
        let context = ffmpeg_next::codec::Context::new_with_codec(codec);

        let mut encoder = context.encoder().video()?;
        encoder.set_width(settings.width);
        encoder.set_height(settings.height);
        encoder.set_format(to_ffmpeg_pixel(settings.pixel_format));
        encoder.set_time_base(ffmpeg_next::Rational::from(settings.time_base()));
        encoder.set_frame_rate(Some(ffmpeg_next::Rational::from(settings.frame_rate())));
        encoder.set_bit_rate(settings.bitrate as usize);
        encoder.set_gop(settings.gop_size);
        encoder.set_max_b_frames(0);
        if settings.global_header {
            encoder.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
        }

        let mut opts = Dictionary::new();
        for (key, value) in settings.private_options() {
            opts.set(key, value);
        }
        let encoder = encoder.open_with(opts)?;

        let time_base = Rational::from(ffmpeg_next::Rational::from(unsafe {
            (*encoder.0.as_ptr()).time_base
        }));
        let extradata = unsafe {
            let ctx = encoder.0.as_ptr();
            if (*ctx).extradata.is_null() || (*ctx).extradata_size <= 0 {
                None
            } else {
                Some(Bytes::copy_from_slice(std::slice::from_raw_parts(
                    (*ctx).extradata,
                    (*ctx).extradata_size as usize,
                )))
            }
        };

        log::info!(
            "encoder {} opened: {}x{} @ {} fps, {} bit/s, gop {}",
            settings.codec,
            settings.width,
            settings.height,
            settings.frame_rate,
            settings.bitrate,
            settings.gop_size
        );

        Ok(Self {
            name: settings.codec.clone(),
            inner: encoder,
            time_base,
            extradata,
        })
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn extradata(&self) -> Option<Bytes> {
        self.extradata.clone()
    }

    fn send_frame(&mut self, frame: &VideoFrame) -> Result<(), CodecError> {
        let av_frame = nv12_to_av_frame(frame)?;
        self.inner.send_frame(&av_frame)?;
        Ok(())
    }

    fn send_eof(&mut self) -> Result<(), CodecError> {
        self.inner.send_eof()?;
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Option<Packet>, CodecError> {
        let mut packet = ffmpeg_next::codec::packet::Packet::empty();
        match self.inner.receive_packet(&mut packet) {
            Ok(()) => {
                let mut out = Packet::new(
                    packet.data().map(Bytes::copy_from_slice).unwrap_or_default(),
                    self.time_base,
                );
                out.pts = packet.pts();
                out.dts = packet.dts();
                out.duration = packet.duration();
                out.is_key = packet.is_key();
                Ok(Some(out))
            }
            Err(ffmpeg_next::Error::Other { errno })
                if errno == ffmpeg_next::util::error::EAGAIN =>
            {
                Ok(None)
            }
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
