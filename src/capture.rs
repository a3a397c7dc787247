use std::fmt::{Display, Formatter};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use media_bus::{Camera, DeviceError};
use parking_lot::Mutex;

use crate::{error::ConfigurationError, exchange::FrameExchange, running::RunningFlag};

pub const DEFAULT_ACQUISITION_TIMEOUT: Duration = Duration::from_secs(5);

const FPS_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Acquiring,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames: u64,
    pub timeouts: u64,
    pub errors: u64,
}

impl Display for CaptureStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "frames={} timeouts={} errors={}",
            self.frames, self.timeouts, self.errors
        )
    }
}

struct Shared {
    state: Mutex<CaptureState>,
    release_requested: AtomicBool,
    fps_bits: AtomicU64,
}

/// Cloneable control surface of a running [`CaptureLoop`].
#[derive(Clone)]
pub struct CaptureHandle {
    shared: Arc<Shared>,
    running: RunningFlag,
}

impl CaptureHandle {
    /// Ends acquisition. Safe from any thread and idempotent; the camera is
    /// released by the loop thread at its next iteration boundary.
    pub fn stop(&self) {
        self.running.stop();
        if !self.shared.release_requested.swap(true, Ordering::AcqRel) {
            log::info!("capture stop requested");
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.shared.state.lock()
    }

    /// Frames per second measured over the last full window.
    pub fn fps(&self) -> f64 {
        f64::from_bits(self.shared.fps_bits.load(Ordering::Relaxed))
    }
}

/// Pulls frames from a camera and fans every frame out to the first
/// `device_count` exchange slots.
pub struct CaptureLoop<C: Camera> {
    camera: C,
    exchange: Arc<FrameExchange>,
    device_count: usize,
    acquisition_timeout: Duration,
    handle: CaptureHandle,
}

impl<C: Camera> CaptureLoop<C> {
    pub fn new(
        camera: C,
        exchange: Arc<FrameExchange>,
        device_count: usize,
        running: RunningFlag,
    ) -> Result<Self, ConfigurationError> {
        if device_count == 0 {
            return Err(ConfigurationError::new("capture needs at least one device"));
        }
        if device_count > exchange.len() {
            return Err(ConfigurationError::new(format!(
                "{} devices but the frame exchange has {} slots",
                device_count,
                exchange.len()
            )));
        }
        Ok(Self {
            camera,
            exchange,
            device_count,
            acquisition_timeout: DEFAULT_ACQUISITION_TIMEOUT,
            handle: CaptureHandle {
                shared: Arc::new(Shared {
                    state: Mutex::new(CaptureState::Idle),
                    release_requested: AtomicBool::new(false),
                    fps_bits: AtomicU64::new(0f64.to_bits()),
                }),
                running,
            },
        })
    }

    pub fn with_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.acquisition_timeout = timeout;
        self
    }

    pub fn handle(&self) -> CaptureHandle {
        self.handle.clone()
    }

    fn set_state(&self, state: CaptureState) {
        *self.handle.shared.state.lock() = state;
    }

    /// Runs until the running flag goes false, then releases the camera.
    pub fn run(mut self) -> Result<CaptureStats, DeviceError> {
        log::info!("capture starting: {}", self.camera.describe());
        self.set_state(CaptureState::Acquiring);
        if let Err(e) = self.camera.start_acquisition() {
            self.set_state(CaptureState::Stopped);
            return Err(e);
        }

        let mut stats = CaptureStats::default();
        let mut window_start = Instant::now();
        let mut window_frames = 0u64;

        while self.handle.running.is_running() {
            match self.camera.acquire(self.acquisition_timeout) {
                Ok(frame) => {
                    let frame = Arc::new(frame.with_pts(stats.frames as i64));
                    stats.frames += 1;
                    window_frames += 1;
                    for slot in 0..self.device_count {
                        if let Err(e) = self.exchange.put(slot, frame.clone()) {
                            log::error!("capture put failed: {}", e);
                        }
                    }
                }
                Err(e) if e.is_timeout() => {
                    stats.timeouts += 1;
                    log::warn!("capture: {}", e);
                }
                Err(e) => {
                    stats.errors += 1;
                    log::error!("capture: acquisition failed: {}", e);
                }
            }

            let elapsed = window_start.elapsed();
            if elapsed >= FPS_WINDOW {
                let fps = window_frames as f64 / elapsed.as_secs_f64();
                self.handle
                    .shared
                    .fps_bits
                    .store(fps.to_bits(), Ordering::Relaxed);
                log::info!("capture: {:.1} fps", fps);
                window_start = Instant::now();
                window_frames = 0;
            }
        }

        if let Err(e) = self.camera.stop_acquisition() {
            log::warn!("capture: camera release failed: {}", e);
        }
        self.set_state(CaptureState::Stopped);
        log::info!("capture stopped: {}", stats);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use media_bus::{PixelFormat, TestPatternCamera};

    use super::*;
    use crate::{exchange::SlotValue, test_utils::ScriptedCamera};

    #[test]
    fn test_zero_devices_rejected() -> anyhow::Result<()> {
        let running = RunningFlag::new();
        let exchange = Arc::new(FrameExchange::new(1, running.clone())?);
        let camera = TestPatternCamera::new(4, 2, PixelFormat::Bgr24)?;
        assert!(CaptureLoop::new(camera, exchange, 0, running).is_err());
        Ok(())
    }

    #[test]
    fn test_capture_fans_out_to_all_slots() -> anyhow::Result<()> {
        let running = RunningFlag::new();
        let exchange = Arc::new(FrameExchange::new(2, running.clone())?);
        let camera = TestPatternCamera::new(4, 2, PixelFormat::Bgr24)?.with_frame_rate(200);
        let capture = CaptureLoop::new(camera, exchange.clone(), 2, running.clone())?;
        let handle = capture.handle();
        assert_eq!(handle.state(), CaptureState::Idle);

        let worker = thread::spawn(move || capture.run());

        let a = exchange.fetch(0)?.into_frame().expect("frame on slot 0");
        let b = exchange.fetch(1)?.into_frame().expect("frame on slot 1");
        assert_eq!(a.width, 4);
        assert_eq!(b.format, PixelFormat::Bgr24);
        assert_eq!(handle.state(), CaptureState::Acquiring);

        let stopper = {
            let handle = handle.clone();
            thread::spawn(move || handle.stop())
        };
        stopper.join().unwrap();
        handle.stop();

        let stats = worker.join().unwrap()?;
        assert!(stats.frames >= 1);
        assert_eq!(handle.state(), CaptureState::Stopped);
        assert!(exchange.fetch(0)?.is_stop());
        Ok(())
    }

    #[test]
    fn test_capture_survives_timeouts_and_errors() -> anyhow::Result<()> {
        let running = RunningFlag::new();
        let exchange = Arc::new(FrameExchange::new(1, running.clone())?);
        let camera = ScriptedCamera::new(vec![
            Err(DeviceError::Timeout(Duration::from_millis(1))),
            Err(DeviceError::Backend("glitch".to_string())),
            Ok(()),
        ]);
        let released = camera.released();
        let capture = CaptureLoop::new(camera, exchange.clone(), 1, running.clone())?
            .with_acquisition_timeout(Duration::from_millis(10));
        let handle = capture.handle();
        let worker = thread::spawn(move || capture.run());

        let frame = exchange.fetch(0)?;
        assert!(matches!(frame, SlotValue::Frame(ref f) if f.pts.is_some()));
        handle.stop();

        let stats = worker.join().unwrap()?;
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.errors, 1);
        assert!(stats.frames >= 1);
        assert!(released.load(Ordering::SeqCst));
        Ok(())
    }
}
