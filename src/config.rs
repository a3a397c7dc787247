use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use media_bus::{output, DecoderSettings, EncoderSettings, PixelFormat};
use serde::Deserialize;

use crate::{error::ConfigurationError, net::wire::DEFAULT_MAX_PACKET_SIZE, net::ConnectOptions};

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Encode,
    Decode,
}

/// What a session does after a send or receive fails mid-stream.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportFailurePolicy {
    /// Log and go on with the next frame.
    #[default]
    Continue,
    /// End this session.
    Abort,
    /// Re-establish the connection with the role's own procedure.
    Reconnect,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CameraConfig {
    TestPattern {
        #[serde(default = "default_camera_pixel_format")]
        pixel_format: String,
        /// Paces the pattern; 0 free-runs.
        #[serde(default)]
        frame_rate: u32,
    },
    Ffmpeg {
        #[serde(default)]
        format: Option<String>,
        url: String,
        #[serde(default = "default_camera_pixel_format")]
        pixel_format: String,
    },
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig::TestPattern {
            pixel_format: default_camera_pixel_format(),
            frame_rate: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputConfig {
    File,
    /// Empty `address` listens on `port`, otherwise connects to `address:port`.
    Stream {
        #[serde(default)]
        address: String,
        port: u16,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_codec")]
    pub encoder: String,
    #[serde(default = "default_codec")]
    pub decoder: String,
    pub stream_width: u32,
    pub stream_height: u32,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// Mbit/s
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
    #[serde(default = "default_gop_size")]
    pub gop_size: u32,
    #[serde(default)]
    pub preset: String,
    #[serde(default)]
    pub tune: String,
    #[serde(default)]
    pub split_encode_mode: String,
    #[serde(default = "default_output_video_path")]
    pub output_video_path: PathBuf,
    /// Container for file output. Defaults to `mp4` with the `ffmpeg` feature
    /// and to `rawvideo` without it; the built-in muxer only writes
    /// `rawvideo`, `h264` and `hevc` elementary streams.
    #[serde(default = "default_container")]
    pub container: String,
    #[serde(default = "default_output")]
    pub output: OutputConfig,
    #[serde(default)]
    pub timestamp_log_path: Option<PathBuf>,
    #[serde(default = "default_pre_allocated_buffer_size")]
    pub pre_allocated_buffer_size: usize,
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
    #[serde(default = "default_output_pixel_format")]
    pub output_pixel_format: String,
    #[serde(default)]
    pub on_transport_failure: TransportFailurePolicy,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_number_cameras")]
    pub number_cameras: usize,
    pub image_width: u32,
    pub image_height: u32,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default = "default_acquisition_timeout_ms")]
    pub acquisition_timeout_ms: u64,
    pub sessions: Vec<SessionConfig>,
}

fn default_codec() -> String {
    "rawvideo".to_string()
}

fn default_frame_rate() -> u32 {
    30
}

fn default_bitrate() -> u32 {
    8
}

fn default_gop_size() -> u32 {
    30
}

fn default_output_video_path() -> PathBuf {
    PathBuf::from("output/video")
}

fn default_container() -> String {
    if cfg!(feature = "ffmpeg") {
        "mp4".to_string()
    } else {
        "rawvideo".to_string()
    }
}

fn default_output() -> OutputConfig {
    OutputConfig::File
}

fn default_pre_allocated_buffer_size() -> usize {
    1024 * 1024
}

fn default_max_packet_size() -> usize {
    DEFAULT_MAX_PACKET_SIZE
}

fn default_output_pixel_format() -> String {
    "bgr24".to_string()
}

fn default_camera_pixel_format() -> String {
    "bgr24".to_string()
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_number_cameras() -> usize {
    1
}

fn default_acquisition_timeout_ms() -> u64 {
    5000
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::new(format!("read {}: {}", path.display(), e)))?;
        let config = Self::parse(&text).with_context(|| format!("config {}", path.display()))?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigurationError> {
        let config: Config = serde_json::from_str(text)
            .map_err(|e| ConfigurationError::new(format!("malformed config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.sessions.is_empty() {
            return Err(ConfigurationError::new("no sessions configured"));
        }
        if self.mode == Mode::Encode {
            if self.number_cameras == 0 {
                return Err(ConfigurationError::new("number_cameras must be at least 1"));
            }
            if self.sessions.len() > self.number_cameras {
                return Err(ConfigurationError::new(format!(
                    "{} sessions but only {} camera slots",
                    self.sessions.len(),
                    self.number_cameras
                )));
            }
            if self.image_width == 0 || self.image_height == 0 {
                return Err(ConfigurationError::new(format!(
                    "invalid image size {}x{}",
                    self.image_width, self.image_height
                )));
            }
            self.camera_pixel_format()?;
            // The NV12 conversion keeps the camera geometry.
            for (index, session) in self.sessions.iter().enumerate() {
                if session.stream_width != self.image_width
                    || session.stream_height != self.image_height
                {
                    return Err(ConfigurationError::new(format!(
                        "session {}: stream size {}x{} differs from image size {}x{}",
                        index,
                        session.stream_width,
                        session.stream_height,
                        self.image_width,
                        self.image_height
                    )));
                }
            }
        }
        for (index, session) in self.sessions.iter().enumerate() {
            session
                .validate(self.mode)
                .map_err(|e| ConfigurationError::new(format!("session {}: {}", index, e.0)))?;
        }
        Ok(())
    }

    pub fn acquisition_timeout(&self) -> Duration {
        Duration::from_millis(self.acquisition_timeout_ms)
    }

    pub fn camera_pixel_format(&self) -> Result<PixelFormat, ConfigurationError> {
        let name = match &self.camera {
            CameraConfig::TestPattern { pixel_format, .. } => pixel_format,
            CameraConfig::Ffmpeg { pixel_format, .. } => pixel_format,
        };
        let format: PixelFormat = name
            .parse()
            .map_err(|_| ConfigurationError::new(format!("unknown camera pixel format {}", name)))?;
        if format.packed_bytes_per_pixel().is_none() {
            return Err(ConfigurationError::new(format!(
                "camera pixel format must be packed, got {}",
                format
            )));
        }
        Ok(format)
    }
}

impl SessionConfig {
    fn validate(&self, mode: Mode) -> Result<(), ConfigurationError> {
        if self.stream_width == 0 || self.stream_height == 0 {
            return Err(ConfigurationError::new(format!(
                "invalid stream size {}x{}",
                self.stream_width, self.stream_height
            )));
        }
        if self.frame_rate == 0 {
            return Err(ConfigurationError::new("frame_rate must be positive"));
        }
        let codec = match mode {
            Mode::Encode => &self.encoder,
            Mode::Decode => &self.decoder,
        };
        if codec.is_empty() {
            return Err(ConfigurationError::new("codec name is empty"));
        }
        if mode == Mode::Decode && !matches!(self.output, OutputConfig::Stream { .. }) {
            return Err(ConfigurationError::new("decode sessions read from a stream output"));
        }
        if self.max_packet_size == 0 || self.max_packet_size > i32::MAX as usize {
            return Err(ConfigurationError::new(format!(
                "max_packet_size {} out of range",
                self.max_packet_size
            )));
        }
        if self.container.is_empty() {
            return Err(ConfigurationError::new("container is empty"));
        }
        self.output_pixel_format()?;
        Ok(())
    }

    pub fn is_file_output(&self) -> bool {
        matches!(self.output, OutputConfig::File)
    }

    pub fn output_pixel_format(&self) -> Result<PixelFormat, ConfigurationError> {
        self.output_pixel_format.parse().map_err(|_| {
            ConfigurationError::new(format!(
                "unknown output pixel format {}",
                self.output_pixel_format
            ))
        })
    }

    pub fn encoder_settings(&self) -> EncoderSettings {
        EncoderSettings {
            codec: self.encoder.clone(),
            width: self.stream_width,
            height: self.stream_height,
            frame_rate: self.frame_rate,
            bitrate: self.bitrate as u64 * 1024 * 1024,
            gop_size: self.gop_size,
            pixel_format: PixelFormat::Nv12,
            preset: non_empty(&self.preset),
            tune: non_empty(&self.tune),
            split_encode_mode: non_empty(&self.split_encode_mode),
            global_header: self.is_file_output() && !output::is_elementary(&self.container),
        }
    }

    pub fn decoder_settings(&self) -> DecoderSettings {
        DecoderSettings {
            codec: self.decoder.clone(),
            width: self.stream_width,
            height: self.stream_height,
            frame_rate: self.frame_rate,
            pixel_format: PixelFormat::Nv12,
        }
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            max_attempts: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "image_width": 64,
        "image_height": 32,
        "sessions": [{ "stream_width": 64, "stream_height": 32 }]
    }"#;

    #[test]
    fn test_defaults() -> anyhow::Result<()> {
        let config = Config::parse(MINIMAL)?;
        assert_eq!(config.mode, Mode::Encode);
        assert_eq!(config.number_cameras, 1);
        assert_eq!(config.acquisition_timeout(), Duration::from_secs(5));
        assert!(matches!(config.camera, CameraConfig::TestPattern { .. }));

        let session = &config.sessions[0];
        assert_eq!(session.encoder, "rawvideo");
        let container = if cfg!(feature = "ffmpeg") { "mp4" } else { "rawvideo" };
        assert_eq!(session.container, container);
        assert_eq!(session.output, OutputConfig::File);
        assert_eq!(session.max_packet_size, 64 * 1024 * 1024);
        assert_eq!(session.output_pixel_format()?, PixelFormat::Bgr24);
        assert_eq!(session.on_transport_failure, TransportFailurePolicy::Continue);
        assert_eq!(session.connect_options().retry_delay, Duration::from_secs(1));
        Ok(())
    }

    #[test]
    fn test_encoder_settings_mapping() -> anyhow::Result<()> {
        let config = Config::parse(
            r#"{
            "number_cameras": 2,
            "image_width": 64, "image_height": 32,
            "sessions": [
                { "stream_width": 64, "stream_height": 32, "encoder": "h264_nvenc",
                  "bitrate": 4, "preset": "p1", "tune": "", "container": "mp4" },
                { "stream_width": 64, "stream_height": 32,
                  "output": { "type": "stream", "address": "10.0.0.2", "port": 9000 },
                  "on_transport_failure": "reconnect" }
            ]
        }"#,
        )?;

        let file = config.sessions[0].encoder_settings();
        assert_eq!(file.bitrate, 4 * 1024 * 1024);
        assert_eq!(file.preset.as_deref(), Some("p1"));
        assert_eq!(file.tune, None);
        assert!(file.global_header);
        assert_eq!(file.pixel_format, PixelFormat::Nv12);

        let stream = &config.sessions[1];
        assert!(!stream.encoder_settings().global_header);
        assert_eq!(
            stream.output,
            OutputConfig::Stream {
                address: "10.0.0.2".to_string(),
                port: 9000
            }
        );
        assert_eq!(stream.on_transport_failure, TransportFailurePolicy::Reconnect);
        Ok(())
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            r#"{ "image_width": 64, "image_height": 32, "sessions": [] }"#,
            r#"{ "number_cameras": 0, "image_width": 64, "image_height": 32,
                 "sessions": [{ "stream_width": 64, "stream_height": 32 }] }"#,
            r#"{ "image_width": 64, "image_height": 32,
                 "sessions": [{ "stream_width": 0, "stream_height": 32 }] }"#,
            r#"{ "image_width": 64, "image_height": 32,
                 "sessions": [{ "stream_width": 64, "stream_height": 32,
                                "output_pixel_format": "yuv444" }] }"#,
            r#"{ "image_width": 64, "image_height": 32,
                 "sessions": [{ "stream_width": 64, "stream_height": 32 },
                              { "stream_width": 64, "stream_height": 32 }] }"#,
            r#"{ "mode": "decode", "image_width": 64, "image_height": 32,
                 "sessions": [{ "stream_width": 64, "stream_height": 32 }] }"#,
            r#"{ "image_width": 64, "image_height": 32,
                 "camera": { "kind": "test_pattern", "pixel_format": "nv12" },
                 "sessions": [{ "stream_width": 64, "stream_height": 32 }] }"#,
            r#"{ "image_width": 64, "image_height": 32,
                 "sessions": [{ "stream_width": 32, "stream_height": 16 }] }"#,
            r#"{ "image_width": 64 "#,
        ];
        for case in cases {
            assert!(Config::parse(case).is_err(), "accepted: {}", case);
        }
    }

    #[test]
    fn test_ffmpeg_camera_and_decode_mode() -> anyhow::Result<()> {
        let config = Config::parse(
            r#"{
            "mode": "decode",
            "image_width": 64, "image_height": 32,
            "camera": { "kind": "ffmpeg", "format": "v4l2", "url": "/dev/video0" },
            "sessions": [{ "stream_width": 64, "stream_height": 32,
                           "output": { "type": "stream", "port": 9000 },
                           "output_pixel_format": "rgb24" }]
        }"#,
        )?;
        assert_eq!(config.mode, Mode::Decode);
        assert_eq!(
            config.camera,
            CameraConfig::Ffmpeg {
                format: Some("v4l2".to_string()),
                url: "/dev/video0".to_string(),
                pixel_format: "bgr24".to_string(),
            }
        );
        let session = &config.sessions[0];
        assert_eq!(session.output_pixel_format()?, PixelFormat::Rgb24);
        assert_eq!(session.decoder_settings().codec, "rawvideo");
        Ok(())
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = Config::load(Path::new("/nonexistent/camstream.json")).unwrap_err();
        assert!(err.downcast_ref::<ConfigurationError>().is_some());
    }
}
