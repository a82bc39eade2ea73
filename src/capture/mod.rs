//! Camera capture: device backends and the thread that feeds frames into the pipeline.

mod nokhwa_backend;

pub use nokhwa_backend::NokhwaCapture;

use crate::frame::VideoFrame;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

/// Pause after a failed frame grab before trying again.
pub const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Trait for webcam capture backends.
pub trait CaptureBackend {
    fn list_devices() -> Result<Vec<CameraInfo>>
    where
        Self: Sized;

    fn open(config: CaptureConfig) -> Result<Self>
    where
        Self: Sized;

    /// Blocks until the next frame is available.
    fn capture_frame(&mut self) -> Result<VideoFrame>;

    fn frame_size(&self) -> (u32, u32);
}

#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

/// Runs a capture backend on its own thread, handing every frame to a sink.
///
/// The sink runs on the capture thread and must return promptly; frame
/// dropping happens there, not here.
pub struct CaptureLoop {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureLoop {
    /// `open` runs on the capture thread, so backends need not be `Send`.
    /// If it fails the loop logs and exits, and the sink never sees a frame.
    pub fn spawn<B, O, S>(open: O, mut sink: S) -> Result<Self>
    where
        B: CaptureBackend,
        O: FnOnce() -> Result<B> + Send + 'static,
        S: FnMut(VideoFrame) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::Builder::new().name("capture".into()).spawn(move || {
            let mut backend = match open() {
                Ok(backend) => backend,
                Err(e) => {
                    error!("Camera unavailable: {:#}", e);
                    flag.store(false, Ordering::Release);
                    return;
                }
            };
            let (width, height) = backend.frame_size();
            info!("Capture started at {}x{}", width, height);

            while flag.load(Ordering::Acquire) {
                match backend.capture_frame() {
                    Ok(frame) if frame.is_complete() => sink(frame),
                    Ok(frame) => warn!("Discarding short frame {}x{}", frame.width, frame.height),
                    Err(e) => {
                        warn!("Capture failed: {:#}", e);
                        thread::sleep(ERROR_BACKOFF);
                    }
                }
            }
            info!("Capture stopped");
        })?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// False once the loop has stopped or the camera failed to open.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
