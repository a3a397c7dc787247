use std::ffi::CString;
use std::path::Path;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError},
};
use std::thread::JoinHandle;
use std::time::Duration;

use ffmpeg_next::Dictionary;

use crate::{
    device::Camera,
    error::DeviceError,
    frame::{PixelFormat, VideoFrame},
};

use super::{av_frame_to_frame, to_ffmpeg_pixel};

/// Resolve input format by name (e.g. "v4l2", "lavfi") via FFmpeg's av_find_input_format.
fn find_input_format(name: &str) -> Result<ffmpeg_next::format::format::Input, DeviceError> {
    let cname = CString::new(name)
        .map_err(|e| DeviceError::Backend(format!("invalid format name {:?}: {}", name, e)))?;
    let ptr = unsafe { ffmpeg_next::ffi::av_find_input_format(cname.as_ptr()) };
    if ptr.is_null() {
        return Err(DeviceError::Backend(format!("input format not found: {}", name)));
    }
    Ok(unsafe { ffmpeg_next::format::format::Input::wrap(ptr as *mut _) })
}

fn open_input(
    url: &str,
    format: Option<&str>,
    options: &[(String, String)],
) -> Result<ffmpeg_next::format::context::Input, DeviceError> {
    use ffmpeg_next::format::format::Format;

    let mut opts = Dictionary::new();
    for (key, value) in options {
        opts.set(key, value);
    }
    let path = Path::new(url);
    let input = match format {
        Some(name) => {
            let fmt = find_input_format(name)?;
            ffmpeg_next::format::open_with(path, &Format::Input(fmt), opts)?.input()
        }
        None => ffmpeg_next::format::input_with_dictionary(path, opts)?,
    };
    Ok(input)
}

struct Reader {
    stop: Arc<AtomicBool>,
    frames: Receiver<Result<VideoFrame, DeviceError>>,
    handle: JoinHandle<()>,
}

/// A camera read through an FFmpeg input device (`v4l2`, `lavfi`, `avfoundation`, ...).
///
/// Demuxing and decoding run on a reader thread; [`Camera::acquire`] waits on
/// it with the acquisition timeout.
pub struct DeviceCamera {
    url: String,
    format: Option<String>,
    options: Vec<(String, String)>,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    reader: Option<Reader>,
}

impl DeviceCamera {
    /// Opens the device once to check that it exposes a video stream.
    pub fn new(
        url: &str,
        format: Option<&str>,
        options: Vec<(String, String)>,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
    ) -> Result<Self, DeviceError> {
        let input = open_input(url, format, &options)?;
        if input.streams().best(ffmpeg_next::media::Type::Video).is_none() {
            return Err(DeviceError::NoDevice);
        }
        drop(input);

        Ok(Self {
            url: url.to_string(),
            format: format.map(str::to_string),
            options,
            width,
            height,
            pixel_format,
            reader: None,
        })
    }

    fn read_loop(
        url: String,
        format: Option<String>,
        options: Vec<(String, String)>,
        target: (u32, u32, PixelFormat),
        stop: Arc<AtomicBool>,
        tx: SyncSender<Result<VideoFrame, DeviceError>>,
    ) -> Result<(), DeviceError> {
        let (width, height, pixel_format) = target;
        let mut input = open_input(&url, format.as_deref(), &options)?;
        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or(DeviceError::NoDevice)?;
        let index = stream.index();
        let context = ffmpeg_next::codec::Context::from_parameters(stream.parameters())?;
        let mut decoder = context.decoder().video()?;
        let mut scaler: Option<ffmpeg_next::software::scaling::Context> = None;

        for (stream, packet) in input.packets() {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            if stream.index() != index {
                continue;
            }
            if let Err(e) = decoder.send_packet(&packet) {
                log::warn!("device decoder rejected packet: {}", e);
                continue;
            }
            let mut decoded = ffmpeg_next::frame::Video::empty();
            while decoder.receive_frame(&mut decoded).is_ok() {
                if scaler.is_none() {
                    scaler = Some(ffmpeg_next::software::scaling::Context::get(
                        decoded.format(),
                        decoded.width(),
                        decoded.height(),
                        to_ffmpeg_pixel(pixel_format),
                        width,
                        height,
                        ffmpeg_next::software::scaling::flag::Flags::BILINEAR,
                    )?);
                }
                let mut converted = ffmpeg_next::frame::Video::empty();
                if let Some(scaler) = scaler.as_mut() {
                    scaler.run(&decoded, &mut converted)?;
                }
                match tx.try_send(Ok(av_frame_to_frame(&converted, pixel_format))) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => return Ok(()),
                }
            }
        }
        Ok(())
    }
}

impl Camera for DeviceCamera {
    fn describe(&self) -> String {
        format!(
            "ffmpeg device {} ({}) -> {}x{} {}",
            self.url,
            self.format.as_deref().unwrap_or("auto"),
            self.width,
            self.height,
            self.pixel_format
        )
    }

    fn start_acquisition(&mut self) -> Result<(), DeviceError> {
        if self.reader.is_some() {
            return Ok(());
        }
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = std::sync::mpsc::sync_channel(1);

        let url = self.url.clone();
        let format = self.format.clone();
        let options = self.options.clone();
        let target = (self.width, self.height, self.pixel_format);
        let stop_clone = stop.clone();
        let handle = std::thread::Builder::new()
            .name("device-reader".to_string())
            .spawn(move || {
                let err_tx = tx.clone();
                if let Err(e) = Self::read_loop(url, format, options, target, stop_clone, tx) {
                    log::error!("device reader stopped: {}", e);
                    let _ = err_tx.try_send(Err(e));
                }
            })
            .map_err(|e| DeviceError::Backend(format!("spawn device reader: {}", e)))?;

        self.reader = Some(Reader {
            stop,
            frames: rx,
            handle,
        });
        Ok(())
    }

    fn acquire(&mut self, timeout: Duration) -> Result<VideoFrame, DeviceError> {
        let reader = self.reader.as_ref().ok_or(DeviceError::NotStarted)?;
        match reader.frames.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(DeviceError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(DeviceError::Backend("device reader exited".to_string()))
            }
        }
    }

    fn stop_acquisition(&mut self) -> Result<(), DeviceError> {
        if let Some(reader) = self.reader.take() {
            reader.stop.store(true, Ordering::Relaxed);
            // the reader also exits on its next send once the receiver is gone
            drop(reader.frames);
            if reader.handle.join().is_err() {
                return Err(DeviceError::Backend("device reader panicked".to_string()));
            }
        }
        Ok(())
    }
}
