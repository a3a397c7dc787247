//! Collaborator doubles shared by unit tests.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use media_bus::{
    CodecError, Camera, DeviceError, Muxer, Packet, PixelFormat, Rational, VideoEncoder,
    VideoFrame,
};
use parking_lot::Mutex;

/// Plays back a script of acquisition results (`Ok(())` yields a 4x2 BGR
/// frame), then produces frames every millisecond.
pub struct ScriptedCamera {
    script: VecDeque<Result<(), DeviceError>>,
    released: Arc<AtomicBool>,
}

impl ScriptedCamera {
    pub fn new(script: Vec<Result<(), DeviceError>>) -> Self {
        Self {
            script: script.into(),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn released(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }
}

impl Camera for ScriptedCamera {
    fn describe(&self) -> String {
        "scripted camera".to_string()
    }

    fn start_acquisition(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn acquire(&mut self, _timeout: Duration) -> Result<VideoFrame, DeviceError> {
        std::thread::sleep(Duration::from_millis(1));
        self.script.pop_front().unwrap_or(Ok(()))?;
        Ok(VideoFrame::new(vec![0u8; 24], 4, 2, PixelFormat::Bgr24))
    }

    fn stop_acquisition(&mut self) -> Result<(), DeviceError> {
        self.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Records written packets and trailer calls.
#[derive(Clone)]
pub struct RecordingMuxer {
    pub time_base: Rational,
    pub packets: Arc<Mutex<Vec<Packet>>>,
    pub trailers: Arc<AtomicUsize>,
}

impl RecordingMuxer {
    pub fn new(time_base: Rational) -> Self {
        Self {
            time_base,
            packets: Arc::new(Mutex::new(Vec::new())),
            trailers: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Muxer for RecordingMuxer {
    fn stream_time_base(&self) -> Rational {
        self.time_base
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<(), CodecError> {
        self.packets.lock().push(packet.clone());
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<(), CodecError> {
        self.trailers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Holds `delay` frames back before emitting packets, like a codec with
/// lookahead. Everything left comes out after EOF.
pub struct DelayedEncoder {
    delay: usize,
    held: VecDeque<Packet>,
    eof: bool,
}

impl DelayedEncoder {
    pub fn new(delay: usize) -> Self {
        Self {
            delay,
            held: VecDeque::new(),
            eof: false,
        }
    }
}

impl VideoEncoder for DelayedEncoder {
    fn name(&self) -> &str {
        "delayed"
    }

    fn time_base(&self) -> Rational {
        Rational::new(1, 30)
    }

    fn send_frame(&mut self, frame: &VideoFrame) -> Result<(), CodecError> {
        let mut packet = Packet::new(frame.data.clone(), self.time_base());
        packet.pts = frame.pts;
        packet.dts = frame.pts;
        packet.duration = 1;
        self.held.push_back(packet);
        Ok(())
    }

    fn send_eof(&mut self) -> Result<(), CodecError> {
        self.eof = true;
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Option<Packet>, CodecError> {
        if self.eof || self.held.len() > self.delay {
            return Ok(self.held.pop_front());
        }
        Ok(None)
    }
}
