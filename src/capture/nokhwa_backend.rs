//! Camera capture through nokhwa.

use super::{CameraInfo, CaptureBackend, CaptureConfig};
use crate::frame::{PixelFormat, VideoFrame};
use anyhow::{anyhow, Context, Result};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use tracing::{debug, info};

pub struct NokhwaCapture {
    camera: Camera,
    width: u32,
    height: u32,
}

impl NokhwaCapture {
    /// Requests tried in order: the configured mode in each common encoding,
    /// then whatever the driver picks.
    fn requests(config: &CaptureConfig) -> Vec<RequestedFormat<'static>> {
        let resolution = Resolution::new(config.width, config.height);
        let mut requests: Vec<_> = [FrameFormat::NV12, FrameFormat::YUYV, FrameFormat::MJPEG]
            .into_iter()
            .map(|encoding| {
                let format = CameraFormat::new(resolution, encoding, config.fps);
                RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format))
            })
            .collect();
        requests.push(RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate));
        requests
    }
}

impl CaptureBackend for NokhwaCapture {
    fn list_devices() -> Result<Vec<CameraInfo>> {
        let devices = nokhwa::query(ApiBackend::Auto).context("querying cameras")?;
        Ok(devices
            .into_iter()
            .filter_map(|d| {
                Some(CameraInfo {
                    index: d.index().as_index().ok()?,
                    name: d.human_name().to_string(),
                })
            })
            .collect())
    }

    fn open(config: CaptureConfig) -> Result<Self> {
        for request in Self::requests(&config) {
            let mut camera = match Camera::new(CameraIndex::Index(config.device_index), request) {
                Ok(camera) => camera,
                Err(e) => {
                    debug!("Camera {} rejected request: {}", config.device_index, e);
                    continue;
                }
            };
            // Some drivers accept the request and only fail once streaming starts.
            if let Err(e) = camera.open_stream() {
                debug!("Camera {} failed to stream: {}", config.device_index, e);
                continue;
            }

            let format = camera.camera_format();
            info!(
                "Camera {} streaming {}x{} {:?} @ {} fps",
                config.device_index,
                format.width(),
                format.height(),
                format.format(),
                format.frame_rate()
            );
            return Ok(Self {
                width: format.width(),
                height: format.height(),
                camera,
            });
        }
        Err(anyhow!("camera {} could not be opened in any format", config.device_index))
    }

    fn capture_frame(&mut self) -> Result<VideoFrame> {
        let buffer = self.camera.frame()?;
        let decoded = buffer.decode_image::<RgbFormat>()?;
        let (width, height) = decoded.dimensions();
        self.width = width;
        self.height = height;
        Ok(VideoFrame::from_data(width, height, PixelFormat::Rgb, decoded.into_raw()))
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for NokhwaCapture {
    fn drop(&mut self) {
        let _ = self.camera.stop_stream();
    }
}
