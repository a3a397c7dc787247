use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::{
    error::DeviceError,
    frame::{PixelFormat, VideoFrame},
};

/// A frame source driven by the capture loop. Every call happens on the
/// capture thread; implementations only need to be `Send`.
pub trait Camera: Send {
    fn describe(&self) -> String;

    fn start_acquisition(&mut self) -> Result<(), DeviceError>;

    /// Blocks until the next frame is available or `timeout` elapses.
    fn acquire(&mut self, timeout: Duration) -> Result<VideoFrame, DeviceError>;

    fn stop_acquisition(&mut self) -> Result<(), DeviceError>;
}

impl<C: Camera + ?Sized> Camera for Box<C> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn start_acquisition(&mut self) -> Result<(), DeviceError> {
        (**self).start_acquisition()
    }

    fn acquire(&mut self, timeout: Duration) -> Result<VideoFrame, DeviceError> {
        (**self).acquire(timeout)
    }

    fn stop_acquisition(&mut self) -> Result<(), DeviceError> {
        (**self).stop_acquisition()
    }
}

/// Eight vertical color bars (white, yellow, cyan, green, magenta, red, blue,
/// black) scrolling one bar width every `frame_rate` frames.
const BARS: [(u8, u8, u8); 8] = [
    (235, 235, 235),
    (235, 235, 16),
    (16, 235, 235),
    (16, 235, 16),
    (235, 16, 235),
    (235, 16, 16),
    (16, 16, 235),
    (16, 16, 16),
];

/// Synthetic camera producing scrolling color bars in a packed format.
pub struct TestPatternCamera {
    width: u32,
    height: u32,
    format: PixelFormat,
    frame_interval: Option<Duration>,
    next_deadline: Option<Instant>,
    started: bool,
    index: u64,
}

impl TestPatternCamera {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self, DeviceError> {
        if width == 0 || height == 0 {
            return Err(DeviceError::Backend(format!(
                "invalid test pattern size {}x{}",
                width, height
            )));
        }
        if format.packed_bytes_per_pixel().is_none() {
            return Err(DeviceError::Backend(format!(
                "test pattern needs a packed format, got {}",
                format
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            frame_interval: None,
            next_deadline: None,
            started: false,
            index: 0,
        })
    }

    /// Paces acquisition to `fps` frames per second instead of free-running.
    pub fn with_frame_rate(mut self, fps: u32) -> Self {
        if fps > 0 {
            self.frame_interval = Some(Duration::from_secs(1) / fps);
        }
        self
    }

    fn render(&self) -> Bytes {
        let bpp = self.format.packed_bytes_per_pixel().unwrap_or(3);
        let w = self.width as usize;
        let bar_width = w.div_ceil(BARS.len()).max(1);
        let shift = self.index as usize % w.max(1);

        let mut row = vec![0u8; w * bpp];
        for (x, px) in row.chunks_mut(bpp).enumerate() {
            let (r, g, b) = BARS[((x + shift) / bar_width) % BARS.len()];
            match self.format {
                PixelFormat::Rgb24 => px.copy_from_slice(&[r, g, b]),
                PixelFormat::Bgra => px.copy_from_slice(&[b, g, r, 255]),
                _ => px.copy_from_slice(&[b, g, r]),
            }
        }

        let mut data = Vec::with_capacity(row.len() * self.height as usize);
        for _ in 0..self.height {
            data.extend_from_slice(&row);
        }
        Bytes::from(data)
    }
}

impl Camera for TestPatternCamera {
    fn describe(&self) -> String {
        self.to_string()
    }

    fn start_acquisition(&mut self) -> Result<(), DeviceError> {
        self.started = true;
        self.next_deadline = self.frame_interval.map(|_| Instant::now());
        Ok(())
    }

    fn acquire(&mut self, timeout: Duration) -> Result<VideoFrame, DeviceError> {
        if !self.started {
            return Err(DeviceError::NotStarted);
        }
        if let (Some(interval), Some(deadline)) = (self.frame_interval, self.next_deadline) {
            let wait = deadline.saturating_duration_since(Instant::now());
            if wait > timeout {
                std::thread::sleep(timeout);
                return Err(DeviceError::Timeout(timeout));
            }
            std::thread::sleep(wait);
            self.next_deadline = Some(deadline + interval);
        }

        let frame = VideoFrame::new(self.render(), self.width, self.height, self.format);
        self.index += 1;
        Ok(frame)
    }

    fn stop_acquisition(&mut self) -> Result<(), DeviceError> {
        self.started = false;
        Ok(())
    }
}

impl Display for TestPatternCamera {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "test pattern {}x{} {}",
            self.width, self.height, self.format
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_requires_start() {
        let mut camera = TestPatternCamera::new(16, 4, PixelFormat::Bgr24).unwrap();
        assert!(matches!(
            camera.acquire(Duration::from_millis(10)),
            Err(DeviceError::NotStarted)
        ));
    }

    #[test]
    fn test_pattern_frames_are_complete() -> anyhow::Result<()> {
        let mut camera = TestPatternCamera::new(16, 4, PixelFormat::Bgra)?;
        camera.start_acquisition()?;
        let first = camera.acquire(Duration::from_millis(10))?;
        let second = camera.acquire(Duration::from_millis(10))?;
        first.validate()?;
        second.validate()?;
        assert_ne!(first.data, second.data, "pattern should scroll");
        camera.stop_acquisition()?;
        Ok(())
    }

    #[test]
    fn test_pattern_rejects_planar_format() {
        assert!(TestPatternCamera::new(16, 4, PixelFormat::Nv12).is_err());
    }

    #[test]
    fn test_paced_camera_times_out() -> anyhow::Result<()> {
        let mut camera = TestPatternCamera::new(8, 2, PixelFormat::Rgb24)?.with_frame_rate(1);
        camera.start_acquisition()?;
        camera.acquire(Duration::from_millis(50))?;
        let err = camera.acquire(Duration::from_millis(20)).unwrap_err();
        assert!(err.is_timeout());
        Ok(())
    }
}
