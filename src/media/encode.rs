use std::fmt::{Display, Formatter};
use std::sync::Arc;

use media_bus::{scaler::Scaler, Muxer, Packet, PixelFormat, VideoEncoder, VideoFrame};

use crate::{
    config::TransportFailurePolicy,
    error::{PipelineError, TransportError},
    exchange::{FrameExchange, SlotValue},
    media::TimestampLog,
    net::{wire, LazyConnection},
    running::RunningFlag,
};

/// Where encoded packets go.
pub enum EncodeOutput {
    /// Container file; header already written by the muxer.
    File(Box<dyn Muxer>),
    /// Length-prefixed packets on a TCP connection.
    Stream(LazyConnection),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodeStats {
    pub frames_in: u64,
    pub frames_encoded: u64,
    pub packets_out: u64,
    pub bytes_out: u64,
    pub codec_errors: u64,
    pub transport_errors: u64,
}

impl Display for EncodeStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "frames_in={} encoded={} packets={} bytes={} codec_errors={} transport_errors={}",
            self.frames_in,
            self.frames_encoded,
            self.packets_out,
            self.bytes_out,
            self.codec_errors,
            self.transport_errors
        )
    }
}

/// One encode session: fetches frames from its exchange slot, converts them
/// to NV12, encodes and delivers every packet.
pub struct EncodePipeline {
    session: usize,
    exchange: Arc<FrameExchange>,
    running: RunningFlag,
    encoder: Box<dyn VideoEncoder>,
    scaler: Scaler,
    output: EncodeOutput,
    on_transport_failure: TransportFailurePolicy,
    timestamp_log: Option<TimestampLog>,
    next_pts: i64,
    stats: EncodeStats,
    aborted: bool,
    finished: bool,
}

impl EncodePipeline {
    /// Session `session` consumes exchange slot `session`.
    pub fn new(
        session: usize,
        exchange: Arc<FrameExchange>,
        running: RunningFlag,
        encoder: Box<dyn VideoEncoder>,
        stream_size: (u32, u32),
        output: EncodeOutput,
    ) -> Self {
        Self {
            session,
            exchange,
            running,
            encoder,
            scaler: Scaler::new(PixelFormat::Nv12, stream_size.0, stream_size.1),
            output,
            on_transport_failure: TransportFailurePolicy::default(),
            timestamp_log: None,
            next_pts: 0,
            stats: EncodeStats::default(),
            aborted: false,
            finished: false,
        }
    }

    pub fn with_transport_policy(mut self, policy: TransportFailurePolicy) -> Self {
        self.on_transport_failure = policy;
        self
    }

    pub fn with_timestamp_log(mut self, log: TimestampLog) -> Self {
        self.timestamp_log = Some(log);
        self
    }

    pub fn session(&self) -> usize {
        self.session
    }

    pub fn stats(&self) -> &EncodeStats {
        &self.stats
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Blocks on the stream connection (accept or connect-with-retry) if the
    /// output is a stream that is not established yet.
    pub fn connect(&mut self) -> Result<(), PipelineError> {
        if let EncodeOutput::Stream(conn) = &mut self.output {
            let conn = conn.get(&self.running)?;
            log::info!(
                "encode-{}: streaming as {} to {:?}",
                self.session,
                conn.role(),
                conn.peer_addr().ok()
            );
        }
        Ok(())
    }

    /// Processes frames until the exchange hands out the stop sentinel with
    /// the running flag down, or the session aborts.
    pub fn run(&mut self) -> EncodeStats {
        if let Err(e) = self.connect() {
            log::error!("encode-{}: no connection: {}", self.session, e);
            self.aborted = true;
            return self.stats.clone();
        }

        loop {
            let frame = match self.exchange.fetch(self.session) {
                Ok(SlotValue::Frame(frame)) => frame,
                Ok(SlotValue::Stop) => {
                    if self.running.is_running() {
                        continue;
                    }
                    break;
                }
                Err(e) => {
                    log::error!("encode-{}: {}", self.session, e);
                    self.aborted = true;
                    break;
                }
            };

            if let Some(log) = self.timestamp_log.as_mut() {
                if let Err(e) = log.record(self.stats.frames_in) {
                    log::warn!("encode-{}: timestamp log: {}", self.session, e);
                }
            }
            self.stats.frames_in += 1;

            match self.encode_frame(&frame) {
                Ok(()) => {}
                Err(e @ (PipelineError::Wire(_) | PipelineError::Transport(_))) => {
                    self.stats.transport_errors += 1;
                    log::error!("encode-{}: send failed: {}", self.session, e);
                    if !self.recover_transport() {
                        break;
                    }
                }
                Err(e) => {
                    self.stats.codec_errors += 1;
                    log::warn!(
                        "encode-{}: frame {} dropped: {}",
                        self.session,
                        self.stats.frames_in - 1,
                        e
                    );
                }
            }
        }

        log::info!("encode-{} stopped: {}", self.session, self.stats);
        self.stats.clone()
    }

    /// Applies the session policy after a transport failure. Returns whether
    /// the session goes on.
    fn recover_transport(&mut self) -> bool {
        match self.on_transport_failure {
            TransportFailurePolicy::Continue => true,
            TransportFailurePolicy::Abort => {
                log::warn!("encode-{}: aborting session", self.session);
                self.aborted = true;
                false
            }
            TransportFailurePolicy::Reconnect => {
                let EncodeOutput::Stream(conn) = &mut self.output else {
                    return true;
                };
                let res = if conn.is_ready() {
                    conn.ready().map_or(Ok(()), |conn| conn.reconnect())
                } else {
                    conn.get(&self.running).map(|_| ())
                };
                match res {
                    Ok(()) => true,
                    Err(e) => {
                        log::error!("encode-{}: reconnect failed: {}", self.session, e);
                        self.aborted = true;
                        false
                    }
                }
            }
        }
    }

    /// Converts, encodes and delivers one frame. The frame gets the next
    /// presentation timestamp only if the encoder accepts it.
    pub fn encode_frame(&mut self, frame: &VideoFrame) -> Result<(), PipelineError> {
        let nv12 = self.scaler.run(frame)?.with_pts(self.next_pts);
        self.encoder.send_frame(&nv12)?;
        self.next_pts += 1;
        self.stats.frames_encoded += 1;
        self.drain()
    }

    fn drain(&mut self) -> Result<(), PipelineError> {
        while let Some(packet) = self.encoder.receive_packet()? {
            self.deliver(packet)?;
        }
        Ok(())
    }

    fn deliver(&mut self, mut packet: Packet) -> Result<(), PipelineError> {
        let size = packet.size() as u64;
        match &mut self.output {
            EncodeOutput::File(muxer) => {
                packet.rescale_ts(muxer.stream_time_base());
                muxer.write_packet(&packet)?;
            }
            EncodeOutput::Stream(conn) => {
                // a zero length would read as end of stream
                if packet.is_empty() {
                    return Ok(());
                }
                let conn = conn.ready().ok_or(TransportError::Interrupted)?;
                wire::write_packet(conn, &packet.data)?;
            }
        }
        self.stats.packets_out += 1;
        self.stats.bytes_out += size;
        Ok(())
    }

    /// Flushes the encoder and finalizes the output: container trailer in
    /// file mode, end-of-stream marker in stream mode. Runs once.
    pub fn finish(&mut self) -> Result<(), PipelineError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        self.encoder.send_eof()?;
        if self.aborted {
            while self.encoder.receive_packet()?.is_some() {}
        } else {
            self.drain()?;
        }

        match &mut self.output {
            EncodeOutput::File(muxer) => muxer.write_trailer()?,
            EncodeOutput::Stream(conn) => {
                if let (false, Some(conn)) = (self.aborted, conn.ready()) {
                    wire::write_end_of_stream(conn)?;
                }
            }
        }
        log::info!("encode-{} finished: {}", self.session, self.stats);
        Ok(())
    }
}

#[cfg(test)]
#[path = "encode_test.rs"]
mod encode_test;
