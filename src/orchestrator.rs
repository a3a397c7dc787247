use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use anyhow::Context;
use media_bus::{
    open_decoder, open_encoder, open_muxer, output, Camera, MuxerStream, TestPatternCamera,
};
use tokio_util::sync::CancellationToken;

use crate::{
    capture::{CaptureHandle, CaptureLoop, CaptureStats},
    config::{CameraConfig, Config, Mode, OutputConfig, SessionConfig},
    error::ConfigurationError,
    exchange::FrameExchange,
    media::{
        session_path, DecodePipeline, DecodeStats, EncodeOutput, EncodePipeline, EncodeStats,
        RawFileSink, TimestampLog,
    },
    net::LazyConnection,
    running::RunningFlag,
};

/// Cloneable trigger for a coordinated stop, usable from the signal path.
#[derive(Clone)]
pub struct ShutdownHandle {
    running: RunningFlag,
    exchange: Arc<FrameExchange>,
    capture: Option<CaptureHandle>,
    cancel: CancellationToken,
}

impl ShutdownHandle {
    /// Drops the running flag, stops the capture loop, then puts the stop
    /// sentinel into every exchange slot. Repeated calls do nothing new.
    pub fn request_shutdown(&self) {
        if !self.cancel.is_cancelled() {
            log::info!("shutdown requested");
        }
        self.running.stop();
        if let Some(capture) = &self.capture {
            capture.stop();
        }
        self.exchange.shutdown();
        self.cancel.cancel();
    }

    pub fn is_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub capture: Option<CaptureStats>,
    pub encode: Vec<EncodeStats>,
    pub decode: Vec<DecodeStats>,
}

/// Owns every thread of one run: a capture thread and one encode thread per
/// session, or one decode thread per session.
pub struct Orchestrator {
    mode: Mode,
    shutdown: ShutdownHandle,
    capture: Option<CaptureLoop<Box<dyn Camera>>>,
    encoders: Vec<EncodePipeline>,
    decoders: Vec<DecodePipeline>,
}

impl Orchestrator {
    /// Opens cameras, codecs and output files. Anything wrong here is fatal.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        let running = RunningFlag::new();
        let slots = match config.mode {
            Mode::Encode => config.number_cameras,
            Mode::Decode => config.sessions.len(),
        };
        let exchange = Arc::new(FrameExchange::new(slots, running.clone())?);

        let mut capture = None;
        let mut encoders = Vec::new();
        let mut decoders = Vec::new();
        match config.mode {
            Mode::Encode => {
                let camera = open_camera(&config)?;
                capture = Some(
                    CaptureLoop::new(camera, exchange.clone(), config.number_cameras, running.clone())?
                        .with_acquisition_timeout(config.acquisition_timeout()),
                );
                for (index, session) in config.sessions.iter().enumerate() {
                    let pipeline = build_encode_session(index, session, &exchange, &running)
                        .with_context(|| format!("session {}", index))?;
                    encoders.push(pipeline);
                }
            }
            Mode::Decode => {
                for (index, session) in config.sessions.iter().enumerate() {
                    let pipeline = build_decode_session(index, session, &running)
                        .with_context(|| format!("session {}", index))?;
                    decoders.push(pipeline);
                }
            }
        }

        let shutdown = ShutdownHandle {
            running,
            exchange,
            capture: capture.as_ref().map(|c| c.handle()),
            cancel: CancellationToken::new(),
        };
        Ok(Self {
            mode: config.mode,
            shutdown,
            capture,
            encoders,
            decoders,
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.request_shutdown();
    }

    /// Runs until shutdown is requested or every pipeline has ended.
    pub fn run(self) -> anyhow::Result<RunSummary> {
        let Orchestrator {
            mode,
            shutdown,
            capture,
            encoders,
            decoders,
        } = self;
        log::info!(
            "starting {:?} mode with {} session(s)",
            mode,
            encoders.len() + decoders.len()
        );

        let (done_tx, done_rx) = mpsc::channel::<usize>();
        let mut summary = RunSummary::default();

        let capture_thread = match capture {
            Some(capture) => {
                let shutdown = shutdown.clone();
                Some(
                    thread::Builder::new()
                        .name("capture".to_string())
                        .spawn(move || {
                            let res = capture.run();
                            if res.is_err() {
                                // nothing will feed the pipelines any more
                                shutdown.request_shutdown();
                            }
                            res
                        })
                        .context("spawn capture thread")?,
                )
            }
            None => None,
        };

        let mut encode_threads: Vec<JoinHandle<(EncodePipeline, EncodeStats)>> = Vec::new();
        for mut pipeline in encoders {
            let done = done_tx.clone();
            let index = pipeline.session();
            let handle = thread::Builder::new()
                .name(format!("encode-{}", index))
                .spawn(move || {
                    let stats = pipeline.run();
                    let _ = done.send(index);
                    (pipeline, stats)
                });
            match handle {
                Ok(handle) => encode_threads.push(handle),
                Err(e) => {
                    shutdown.request_shutdown();
                    return Err(e).context("spawn encode thread");
                }
            }
        }

        let mut decode_threads: Vec<JoinHandle<DecodeStats>> = Vec::new();
        for (index, mut pipeline) in decoders.into_iter().enumerate() {
            let done = done_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("decode-{}", index))
                .spawn(move || {
                    let stats = pipeline.run();
                    let _ = done.send(index);
                    stats
                });
            match handle {
                Ok(handle) => decode_threads.push(handle),
                Err(e) => {
                    shutdown.request_shutdown();
                    return Err(e).context("spawn decode thread");
                }
            }
        }
        drop(done_tx);

        // every pipeline reports once when its thread ends
        let sessions = encode_threads.len() + decode_threads.len();
        for _ in 0..sessions {
            match done_rx.recv() {
                Ok(index) => log::info!("session {} ended", index),
                Err(_) => break,
            }
        }
        if !shutdown.is_requested() {
            log::info!("all sessions ended");
        }
        shutdown.request_shutdown();

        if let Some(handle) = capture_thread {
            match handle.join() {
                Ok(Ok(stats)) => summary.capture = Some(stats),
                Ok(Err(e)) => log::error!("capture failed: {}", e),
                Err(_) => log::error!("capture thread panicked"),
            }
        }

        let mut finished = Vec::new();
        for handle in encode_threads {
            match handle.join() {
                Ok(done) => finished.push(done),
                Err(_) => log::error!("encode thread panicked"),
            }
        }
        for handle in decode_threads {
            match handle.join() {
                Ok(stats) => summary.decode.push(stats),
                Err(_) => log::error!("decode thread panicked"),
            }
        }

        for (mut pipeline, stats) in finished {
            if let Err(e) = pipeline.finish() {
                log::error!("encode-{}: finish failed: {}", pipeline.session(), e);
            }
            summary.encode.push(stats);
        }

        log::info!("all threads joined");
        Ok(summary)
    }
}

fn open_camera(config: &Config) -> Result<Box<dyn Camera>, ConfigurationError> {
    let format = config.camera_pixel_format()?;
    let (width, height) = (config.image_width, config.image_height);
    match &config.camera {
        CameraConfig::TestPattern { frame_rate, .. } => {
            let camera = TestPatternCamera::new(width, height, format)
                .map_err(|e| ConfigurationError::new(e.to_string()))?
                .with_frame_rate(*frame_rate);
            Ok(Box::new(camera))
        }
        #[cfg(feature = "ffmpeg")]
        CameraConfig::Ffmpeg {
            format: input_format,
            url,
            ..
        } => {
            let camera = media_bus::ffmpeg::DeviceCamera::new(
                url,
                input_format.as_deref(),
                Vec::new(),
                width,
                height,
                format,
            )
            .map_err(|e| ConfigurationError::new(format!("camera {}: {}", url, e)))?;
            Ok(Box::new(camera))
        }
        #[cfg(not(feature = "ffmpeg"))]
        CameraConfig::Ffmpeg { .. } => Err(ConfigurationError::new(
            "camera kind ffmpeg needs the ffmpeg feature",
        )),
    }
}

fn build_encode_session(
    index: usize,
    session: &SessionConfig,
    exchange: &Arc<FrameExchange>,
    running: &RunningFlag,
) -> anyhow::Result<EncodePipeline> {
    let settings = session.encoder_settings();
    let encoder = open_encoder(&settings).map_err(|e| {
        ConfigurationError::new(format!("encoder {}: {}", settings.codec, e))
    })?;
    log::info!(
        "session {}: encoder {} {}x{}@{} {} bit/s",
        index,
        encoder.name(),
        settings.width,
        settings.height,
        settings.frame_rate,
        settings.bitrate
    );

    let output = match &session.output {
        OutputConfig::File => {
            let path = session_path(
                &session.output_video_path,
                index,
                output::container_extension(&session.container),
            );
            let stream = MuxerStream {
                codec: settings.codec.clone(),
                width: settings.width,
                height: settings.height,
                frame_rate: settings.frame_rate,
                bitrate: settings.bitrate,
                codec_time_base: encoder.time_base(),
                extradata: encoder.extradata(),
            };
            let muxer = open_muxer(&path, &session.container, &stream).map_err(|e| {
                ConfigurationError::new(format!("output {}: {}", path.display(), e))
            })?;
            EncodeOutput::File(muxer)
        }
        OutputConfig::Stream { address, port } => EncodeOutput::Stream(LazyConnection::endpoint(
            address,
            *port,
            session.connect_options(),
        )),
    };

    let mut pipeline = EncodePipeline::new(
        index,
        exchange.clone(),
        running.clone(),
        encoder,
        (session.stream_width, session.stream_height),
        output,
    )
    .with_transport_policy(session.on_transport_failure);
    if let Some(base) = &session.timestamp_log_path {
        let log = TimestampLog::create(&session_path(base, index, "txt"))
            .with_context(|| format!("timestamp log {}", base.display()))?;
        pipeline = pipeline.with_timestamp_log(log);
    }
    Ok(pipeline)
}

fn build_decode_session(
    index: usize,
    session: &SessionConfig,
    running: &RunningFlag,
) -> anyhow::Result<DecodePipeline> {
    let settings = session.decoder_settings();
    let decoder = open_decoder(&settings).map_err(|e| {
        ConfigurationError::new(format!("decoder {}: {}", settings.codec, e))
    })?;
    let OutputConfig::Stream { address, port } = &session.output else {
        return Err(ConfigurationError::new("decode session without a stream").into());
    };
    let format = session.output_pixel_format()?;
    let path = session_path(&session.output_video_path, index, format.name());
    let sink = RawFileSink::create(&path).with_context(|| format!("sink {}", path.display()))?;

    Ok(DecodePipeline::new(
        index,
        decoder,
        LazyConnection::endpoint(address, *port, session.connect_options()),
        running.clone(),
        Box::new(sink),
        (session.stream_width, session.stream_height),
    )
    .with_packet_buffer(session.pre_allocated_buffer_size, session.max_packet_size)
    .with_output_format(format))
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod orchestrator_test;
