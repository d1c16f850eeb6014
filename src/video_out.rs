use crate::detection::Detection;
use crate::types::{Frame, LaneCounts, VideoConfig};
use anyhow::{bail, Context, Result};
use chrono::Local;
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
    videoio::{VideoWriter, VideoWriterTrait, VideoWriterTraitConst},
};
use std::path::Path;
use tracing::info;

/// mp4v-encoded sink for the annotated recording.
pub struct VideoSink {
    writer: VideoWriter,
}

impl VideoSink {
    pub fn create(config: &VideoConfig, width: i32, height: i32, fps: f64) -> Result<Option<Self>> {
        if !config.save_annotated {
            return Ok(None);
        }

        let output_path = Path::new(&config.output_path);
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        info!("Output video: {}", output_path.display());

        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = VideoWriter::new(
            &config.output_path,
            fourcc,
            fps,
            core::Size::new(width, height),
            true,
        )?;
        if !writer.is_opened()? {
            bail!("failed to open video writer at {}", config.output_path);
        }

        Ok(Some(Self { writer }))
    }

    /// Write a frame untouched (skipped frames go through here).
    pub fn write_raw(&mut self, frame: &Frame) -> Result<()> {
        let bgr = rgb_to_bgr_mat(&frame.data, frame.width, frame.height)?;
        self.writer.write(&bgr)?;
        Ok(())
    }

    pub fn write_annotated(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
        counts: &LaneCounts,
    ) -> Result<()> {
        let annotated = annotate_frame(frame, detections, counts)?;
        self.writer.write(&annotated)?;
        Ok(())
    }

    pub fn release(&mut self) -> Result<()> {
        self.writer.release()?;
        Ok(())
    }
}

fn rgb_to_bgr_mat(data: &[u8], width: usize, height: usize) -> Result<Mat> {
    if data.len() != width * height * 3 {
        bail!(
            "frame buffer is {} bytes, expected {} for {}x{} RGB",
            data.len(),
            width * height * 3,
            width,
            height
        );
    }

    let mat = Mat::from_slice(data)?;
    let mat = mat.reshape(3, height as i32)?;

    let mut bgr = Mat::default();
    imgproc::cvt_color(&mat, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;
    Ok(bgr)
}

/// Detection boxes, the lane split line, and a banner with per-lane counts
/// and a wall-clock timestamp.
fn annotate_frame(frame: &Frame, detections: &[Detection], counts: &LaneCounts) -> Result<Mat> {
    let mut output = rgb_to_bgr_mat(&frame.data, frame.width, frame.height)?;
    let width = frame.width as i32;
    let height = frame.height as i32;

    // Lane split down the frame centerline
    imgproc::line(
        &mut output,
        core::Point::new(width / 2, 0),
        core::Point::new(width / 2, height),
        core::Scalar::new(160.0, 160.0, 160.0, 0.0),
        1,
        imgproc::LINE_AA,
        0,
    )?;

    for detection in detections {
        let [x1, y1, x2, y2] = detection.bbox;
        let x1 = (x1.max(0.0) as i32).min(width - 1);
        let y1 = (y1.max(0.0) as i32).min(height - 1);
        let x2 = (x2.max(0.0) as i32).min(width - 1);
        let y2 = (y2.max(0.0) as i32).min(height - 1);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        imgproc::rectangle(
            &mut output,
            core::Rect::new(x1, y1, x2 - x1, y2 - y1),
            core::Scalar::new(0.0, 255.0, 0.0, 0.0),
            2,
            imgproc::LINE_8,
            0,
        )?;

        let label = format!("#{} {:.2}", detection.class_id, detection.confidence);
        imgproc::put_text(
            &mut output,
            &label,
            core::Point::new(x1, (y1 - 6).max(12)),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.45,
            core::Scalar::new(0.0, 255.0, 0.0, 0.0),
            1,
            imgproc::LINE_8,
            false,
        )?;
    }

    imgproc::rectangle(
        &mut output,
        core::Rect::new(5, 5, 550, 40),
        core::Scalar::new(40.0, 40.0, 40.0, 0.0),
        -1,
        imgproc::LINE_8,
        0,
    )?;

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    let banner = format!(
        "Lane A: {} | Lane B: {} | {}",
        counts.lane_a, counts.lane_b, timestamp
    );
    imgproc::put_text(
        &mut output,
        &banner,
        core::Point::new(12, 32),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.7,
        core::Scalar::new(255.0, 255.0, 255.0, 0.0),
        2,
        imgproc::LINE_8,
        false,
    )?;

    Ok(output)
}
