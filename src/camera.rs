use crate::types::{CameraConfig, Frame};
use anyhow::{bail, Context, Result};
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
};
use std::time::Instant;
use tracing::info;

/// Live capture from a V4L/OpenCV camera device, fixed format requested at
/// open time.
pub struct Camera {
    cap: VideoCapture,
    pub width: i32,
    pub height: i32,
    pub fps: f64,
    started: Instant,
}

impl Camera {
    pub fn open(config: &CameraConfig) -> Result<Self> {
        info!("Opening camera device {}", config.device_index);

        let mut cap = VideoCapture::new(config.device_index, videoio::CAP_ANY)
            .context("failed to create camera capture")?;
        if !cap.is_opened()? {
            bail!("camera device {} could not be opened", config.device_index);
        }

        cap.set(videoio::CAP_PROP_FRAME_WIDTH, config.width as f64)?;
        cap.set(videoio::CAP_PROP_FRAME_HEIGHT, config.height as f64)?;
        cap.set(videoio::CAP_PROP_FPS, config.fps as f64)?;

        // The driver may not honor the request; report what we actually got.
        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
        let mut fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
        if fps <= 0.0 {
            fps = config.fps as f64;
        }

        if width != config.width || height != config.height {
            info!(
                "Camera negotiated {}x{} instead of the requested {}x{}",
                width, height, config.width, config.height
            );
        }
        info!("Camera configured: {}x{} @ {:.1} FPS", width, height, fps);

        Ok(Self {
            cap,
            width,
            height,
            fps,
            started: Instant::now(),
        })
    }

    /// Grab the next frame as packed RGB. A live camera has no EOF, so an
    /// empty grab is an error.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut mat = Mat::default();

        if !VideoCaptureTrait::read(&mut self.cap, &mut mat)? || mat.empty() {
            bail!("camera returned an empty frame");
        }

        let mut rgb_mat = Mat::default();
        imgproc::cvt_color(&mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB, 0)?;

        let data = rgb_mat.data_bytes()?.to_vec();

        Ok(Frame {
            data,
            width: self.width as usize,
            height: self.height as usize,
            timestamp_ms: self.started.elapsed().as_secs_f64() * 1000.0,
        })
    }
}
