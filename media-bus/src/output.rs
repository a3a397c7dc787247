use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::{
    error::CodecError,
    packet::{Packet, Rational},
};

/// A container writer with a single video stream.
///
/// Packets handed to [`Muxer::write_packet`] must already be expressed in
/// [`Muxer::stream_time_base`].
pub trait Muxer: Send {
    fn stream_time_base(&self) -> Rational;

    fn write_packet(&mut self, packet: &Packet) -> Result<(), CodecError>;

    /// Finalizes the container. Calling it again is a no-op.
    fn write_trailer(&mut self) -> Result<(), CodecError>;
}

/// Description of the single stream written into a container.
#[derive(Debug, Clone)]
pub struct MuxerStream {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bitrate: u64,
    pub codec_time_base: Rational,
    pub extradata: Option<Bytes>,
}

/// Containers that are plain concatenations of packet payloads.
const ELEMENTARY: &[&str] = &["rawvideo", "h264", "hevc"];

/// File extension used for a container name.
pub fn container_extension(container: &str) -> &str {
    match container {
        "rawvideo" => "yuv",
        "hevc" => "h265",
        other => other,
    }
}

pub fn is_elementary(container: &str) -> bool {
    ELEMENTARY.contains(&container)
}

/// Opens a muxer for `container` at `path` and writes its header.
pub fn open_muxer(
    path: &Path,
    container: &str,
    stream: &MuxerStream,
) -> Result<Box<dyn Muxer>, CodecError> {
    if is_elementary(container) {
        return Ok(Box::new(ElementaryStreamWriter::create(
            path,
            stream.codec_time_base,
        )?));
    }
    #[cfg(feature = "ffmpeg")]
    {
        Ok(Box::new(crate::ffmpeg::ContainerWriter::create(
            path, container, stream,
        )?))
    }
    #[cfg(not(feature = "ffmpeg"))]
    {
        let _ = stream;
        Err(CodecError::UnsupportedContainer(container.to_string()))
    }
}

/// Writes packet payloads back to back, the layout of raw `.h264`/`.yuv` files.
pub struct ElementaryStreamWriter {
    path: PathBuf,
    inner: BufWriter<File>,
    time_base: Rational,
    have_written_trailer: bool,
    packets: u64,
}

impl ElementaryStreamWriter {
    pub fn create(path: &Path, time_base: Rational) -> Result<Self, CodecError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        log::info!("elementary stream output opened: {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            inner: BufWriter::new(file),
            time_base,
            have_written_trailer: false,
            packets: 0,
        })
    }
}

impl Muxer for ElementaryStreamWriter {
    fn stream_time_base(&self) -> Rational {
        self.time_base
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<(), CodecError> {
        if self.have_written_trailer {
            return Err(CodecError::Flushed);
        }
        self.inner.write_all(&packet.data)?;
        self.packets += 1;
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<(), CodecError> {
        if self.have_written_trailer {
            return Ok(());
        }
        self.have_written_trailer = true;
        self.inner.flush()?;
        self.inner.get_ref().sync_all()?;
        log::info!(
            "elementary stream output finished: {} ({} packets)",
            self.path.display(),
            self.packets
        );
        Ok(())
    }
}
