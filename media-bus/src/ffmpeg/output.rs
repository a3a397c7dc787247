use std::path::Path;

use crate::{
    error::CodecError,
    output::{Muxer, MuxerStream},
    packet::{Packet, Rational},
};

/// Any container FFmpeg can write (mp4, mkv, ...), one video stream.
pub struct ContainerWriter {
    inner: ffmpeg_next::format::context::Output,
    stream_time_base: Rational,
    have_written_trailer: bool,
}

unsafe impl Send for ContainerWriter {}

impl ContainerWriter {
    pub fn create(path: &Path, container: &str, stream: &MuxerStream) -> Result<Self, CodecError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut output = ffmpeg_next::format::output_as(path, container)?;

        let codec = ffmpeg_next::encoder::find_by_name(&stream.codec)
            .ok_or_else(|| CodecError::NotFound(stream.codec.clone()))?;
        let mut writer_stream = output.add_stream(codec)?;
        writer_stream.set_time_base(ffmpeg_next::Rational::from(stream.codec_time_base));
        unsafe {
            let par = (*writer_stream.as_mut_ptr()).codecpar;
            (*par).codec_type = ffmpeg_next::media::Type::Video.into();
            (*par).codec_id = codec.id().into();
            (*par).width = stream.width as i32;
            (*par).height = stream.height as i32;
            (*par).bit_rate = stream.bitrate as i64;
            (*par).format =
                ffmpeg_next::ffi::AVPixelFormat::from(ffmpeg_next::format::Pixel::NV12) as i32;
            if let Some(extra) = stream.extradata.as_ref().filter(|e| !e.is_empty()) {
                let size = extra.len();
                let buf = ffmpeg_next::ffi::av_mallocz(
                    size + ffmpeg_next::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize,
                ) as *mut u8;
                if buf.is_null() {
                    return Err(CodecError::Backend("extradata allocation failed".to_string()));
                }
                std::ptr::copy_nonoverlapping(extra.as_ptr(), buf, size);
                (*par).extradata = buf;
                (*par).extradata_size = size as i32;
            }
        }

        output.write_header()?;
        // the muxer may pick its own stream time base while writing the header
        let stream_time_base = output
            .stream(0)
            .map(|s| Rational::from(s.time_base()))
            .unwrap_or(stream.codec_time_base);

        log::info!(
            "container {} opened: {} (stream time base {})",
            container,
            path.display(),
            stream_time_base
        );
        Ok(Self {
            inner: output,
            stream_time_base,
            have_written_trailer: false,
        })
    }
}

impl Muxer for ContainerWriter {
    fn stream_time_base(&self) -> Rational {
        self.stream_time_base
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<(), CodecError> {
        if self.have_written_trailer {
            return Err(CodecError::Flushed);
        }
        let mut p = ffmpeg_next::codec::packet::Packet::copy(&packet.data);
        p.set_stream(0);
        p.set_pts(packet.pts);
        p.set_dts(packet.dts);
        p.set_duration(packet.duration);
        p.set_position(-1);
        if packet.is_key {
            p.set_flags(ffmpeg_next::codec::packet::Flags::KEY);
        }
        p.write_interleaved(&mut self.inner)?;
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<(), CodecError> {
        if !self.have_written_trailer {
            self.have_written_trailer = true;
            self.inner.write_trailer()?;
        }
        Ok(())
    }
}
