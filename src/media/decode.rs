use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use media_bus::{scaler::Scaler, PixelFormat, VideoDecoder, VideoFrame};

use crate::{
    error::{PipelineError, WireError},
    net::{
        wire::{PacketReader, DEFAULT_MAX_PACKET_SIZE},
        LazyConnection,
    },
    running::RunningFlag,
};

/// Receives decoded frames in the consumer-facing pixel format.
pub trait FrameSink: Send {
    fn consume(&mut self, frame: VideoFrame) -> anyhow::Result<()>;

    fn finish(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<F> FrameSink for F
where
    F: FnMut(VideoFrame) -> anyhow::Result<()> + Send,
{
    fn consume(&mut self, frame: VideoFrame) -> anyhow::Result<()> {
        self(frame)
    }
}

/// Appends raw frame bytes back to back to one file.
pub struct RawFileSink {
    path: PathBuf,
    writer: BufWriter<File>,
    frames: u64,
}

impl RawFileSink {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let writer = BufWriter::new(File::create(path)?);
        log::info!("raw frame sink: {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            frames: 0,
        })
    }
}

impl FrameSink for RawFileSink {
    fn consume(&mut self, frame: VideoFrame) -> anyhow::Result<()> {
        self.writer.write_all(&frame.data)?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.writer.flush()?;
        log::info!("raw frame sink {}: {} frames", self.path.display(), self.frames);
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub packets_in: u64,
    pub bytes_in: u64,
    pub frames_out: u64,
    pub codec_errors: u64,
    pub transport_errors: u64,
}

impl Display for DecodeStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "packets_in={} bytes={} frames_out={} codec_errors={} transport_errors={}",
            self.packets_in, self.bytes_in, self.frames_out, self.codec_errors, self.transport_errors
        )
    }
}

/// Decoder, conversion and consumer of one session.
struct FrameStage {
    decoder: Box<dyn VideoDecoder>,
    scaler: Scaler,
    sink: Box<dyn FrameSink>,
}

impl FrameStage {
    fn drain(&mut self, stats: &mut DecodeStats) -> Result<(), PipelineError> {
        while let Some(frame) = self.decoder.receive_frame()? {
            let converted = self.scaler.run(&frame)?;
            self.sink.consume(converted).map_err(PipelineError::Sink)?;
            stats.frames_out += 1;
        }
        Ok(())
    }

    fn drain_logged(&mut self, session: usize, stats: &mut DecodeStats) {
        if let Err(e) = self.drain(stats) {
            stats.codec_errors += 1;
            log::warn!("decode-{}: {}", session, e);
        }
    }
}

/// One decode session: length-prefixed packets from a connection, decoded
/// and converted for a [`FrameSink`].
pub struct DecodePipeline {
    session: usize,
    connection: LazyConnection,
    running: RunningFlag,
    reader: PacketReader,
    stage: FrameStage,
    stats: DecodeStats,
}

impl DecodePipeline {
    pub fn new(
        session: usize,
        decoder: Box<dyn VideoDecoder>,
        connection: LazyConnection,
        running: RunningFlag,
        sink: Box<dyn FrameSink>,
        stream_size: (u32, u32),
    ) -> Self {
        Self {
            session,
            connection,
            running,
            reader: PacketReader::new(1024 * 1024, DEFAULT_MAX_PACKET_SIZE),
            stage: FrameStage {
                decoder,
                scaler: Scaler::new(PixelFormat::Bgr24, stream_size.0, stream_size.1),
                sink,
            },
            stats: DecodeStats::default(),
        }
    }

    /// Initial receive buffer size and the largest packet accepted.
    pub fn with_packet_buffer(mut self, pre_allocated: usize, max_packet_size: usize) -> Self {
        self.reader = PacketReader::new(pre_allocated, max_packet_size);
        self
    }

    pub fn with_output_format(mut self, format: PixelFormat) -> Self {
        let scaler = &self.stage.scaler;
        self.stage.scaler = Scaler::new(format, scaler.width(), scaler.height());
        self
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    pub fn buffer_capacity(&self) -> usize {
        self.reader.capacity()
    }

    /// Receives until end of stream, a broken length prefix, or shutdown;
    /// then flushes the decoder into the sink.
    pub fn run(&mut self) -> DecodeStats {
        let conn = match self.connection.get(&self.running) {
            Ok(conn) => conn,
            Err(e) => {
                log::error!("decode-{}: no connection: {}", self.session, e);
                return self.stats.clone();
            }
        };
        log::info!(
            "decode-{}: receiving as {} from {:?}",
            self.session,
            conn.role(),
            conn.peer_addr().ok()
        );

        while self.running.is_running() {
            let length = match self.reader.read_len(conn) {
                Ok(0) => {
                    log::info!("decode-{}: end of stream", self.session);
                    break;
                }
                Ok(length) => length,
                Err(WireError::Desync { length }) => {
                    log::error!("decode-{}: desynchronized, length {}", self.session, length);
                    break;
                }
                Err(e) => {
                    if !matches!(&e, WireError::Transport(t) if t.is_closed()) {
                        self.stats.transport_errors += 1;
                    }
                    log::warn!("decode-{}: stream ended: {}", self.session, e);
                    break;
                }
            };

            let payload = match self.reader.read_payload(conn, length) {
                Ok(payload) => payload,
                Err(e) => {
                    self.stats.transport_errors += 1;
                    log::warn!("decode-{}: packet of {} bytes lost: {}", self.session, length, e);
                    continue;
                }
            };

            // arrival order is presentation order: no b-frames on the wire
            let index = self.stats.packets_in as i64;
            self.stats.packets_in += 1;
            self.stats.bytes_in += length as u64;
            if let Err(e) = self.stage.decoder.send_packet(payload, Some(index), Some(index)) {
                self.stats.codec_errors += 1;
                log::warn!("decode-{}: packet {} rejected: {}", self.session, index, e);
                continue;
            }
            self.stage.drain_logged(self.session, &mut self.stats);
        }

        if let Err(e) = self.stage.decoder.send_eof() {
            log::warn!("decode-{}: flush failed: {}", self.session, e);
        }
        self.stage.drain_logged(self.session, &mut self.stats);
        if let Err(e) = self.stage.sink.finish() {
            log::error!("decode-{}: sink finish failed: {:#}", self.session, e);
        }

        log::info!("decode-{} stopped: {}", self.session, self.stats);
        self.stats.clone()
    }
}

#[cfg(test)]
#[path = "decode_test.rs"]
mod decode_test;
