// src/detection.rs

use crate::types::{Frame, ModelConfig};
use anyhow::{ensure, Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use tracing::{debug, info};

const LETTERBOX_FILL: u8 = 114;

#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // [x1, y1, x2, y2] in source pixel coordinates
    pub confidence: f32,
    pub class_id: usize,
}

impl Detection {
    pub fn center_x(&self) -> f32 {
        (self.bbox[0] + self.bbox[2]) / 2.0
    }
}

/// Geometry of the letterbox transform, kept to map predictions back
/// into source pixel coordinates.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn to_source(&self, bbox: [f32; 4]) -> [f32; 4] {
        [
            (bbox[0] - self.pad_x) / self.scale,
            (bbox[1] - self.pad_y) / self.scale,
            (bbox[2] - self.pad_x) / self.scale,
            (bbox[3] - self.pad_y) / self.scale,
        ]
    }
}

pub struct VehicleDetector {
    session: Session,
    config: ModelConfig,
}

impl VehicleDetector {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        info!("Loading detection model: {}", config.path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.num_threads)?
            .commit_from_file(&config.path)
            .context("failed to load detection model")?;

        info!("✓ Vehicle detector ready");
        Ok(Self {
            session,
            config: config.clone(),
        })
    }

    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (input, letterbox) = letterbox_chw(
            &frame.data,
            frame.width,
            frame.height,
            self.config.input_size,
        );

        let output = self.infer(&input)?;

        let detections = parse_predictions(&output, &self.config, letterbox)?;
        let detections = nms(detections, self.config.iou_threshold);

        debug!("{} vehicle(s) after NMS", detections.len());
        Ok(detections)
    }

    fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let size = self.config.input_size;
        let shape = [1, 3, size, size];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.to_vec().into_boxed_slice()))?;

        let outputs = self.session.run(ort::inputs!["images" => input_value])?;
        let output = &outputs[0];
        let (_, data) = output.try_extract_tensor::<f32>()?;

        Ok(data.to_vec())
    }
}

/// Letterbox the RGB frame into a square model input: scale to fit, pad with
/// gray, normalize to [0,1] and reorder HWC -> CHW.
fn letterbox_chw(src: &[u8], src_w: usize, src_h: usize, target: usize) -> (Vec<f32>, Letterbox) {
    let scale = (target as f32 / src_w as f32).min(target as f32 / src_h as f32);
    let scaled_w = (src_w as f32 * scale) as usize;
    let scaled_h = (src_h as f32 * scale) as usize;
    let pad_x = (target - scaled_w) as f32 / 2.0;
    let pad_y = (target - scaled_h) as f32 / 2.0;

    let resized = resize_bilinear(src, src_w, src_h, scaled_w, scaled_h);

    let mut canvas = vec![LETTERBOX_FILL; target * target * 3];
    for y in 0..scaled_h {
        let dst_y = y + pad_y as usize;
        let src_row = y * scaled_w * 3;
        let dst_row = (dst_y * target + pad_x as usize) * 3;
        canvas[dst_row..dst_row + scaled_w * 3]
            .copy_from_slice(&resized[src_row..src_row + scaled_w * 3]);
    }

    let mut input = vec![0.0f32; 3 * target * target];
    for c in 0..3 {
        for y in 0..target {
            for x in 0..target {
                let hwc = (y * target + x) * 3 + c;
                let chw = c * target * target + y * target + x;
                input[chw] = canvas[hwc] as f32 / 255.0;
            }
        }
    }

    (
        input,
        Letterbox {
            scale,
            pad_x,
            pad_y,
        },
    )
}

fn resize_bilinear(src: &[u8], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<u8> {
    let mut dst = vec![0u8; dst_h * dst_w * 3];
    let x_ratio = src_w as f32 / dst_w as f32;
    let y_ratio = src_h as f32 / dst_h as f32;

    for dy in 0..dst_h {
        for dx in 0..dst_w {
            let sx = dx as f32 * x_ratio;
            let sy = dy as f32 * y_ratio;
            let sx0 = sx.floor() as usize;
            let sy0 = sy.floor() as usize;
            let sx1 = (sx0 + 1).min(src_w - 1);
            let sy1 = (sy0 + 1).min(src_h - 1);
            let fx = sx - sx0 as f32;
            let fy = sy - sy0 as f32;

            for c in 0..3 {
                let p00 = src[(sy0 * src_w + sx0) * 3 + c] as f32;
                let p10 = src[(sy0 * src_w + sx1) * 3 + c] as f32;
                let p01 = src[(sy1 * src_w + sx0) * 3 + c] as f32;
                let p11 = src[(sy1 * src_w + sx1) * 3 + c] as f32;

                let val = p00 * (1.0 - fx) * (1.0 - fy)
                    + p10 * fx * (1.0 - fy)
                    + p01 * (1.0 - fx) * fy
                    + p11 * fx * fy;

                dst[(dy * dst_w + dx) * 3 + c] = val.round() as u8;
            }
        }
    }
    dst
}

/// Walk the flat `[1, 4+nc, n]` output tensor: best class per anchor,
/// confidence and class filtering, then the letterbox inverse transform.
fn parse_predictions(
    output: &[f32],
    config: &ModelConfig,
    letterbox: Letterbox,
) -> Result<Vec<Detection>> {
    let attrs = 4 + config.num_classes;
    ensure!(
        output.len() % attrs == 0,
        "model output length {} is not divisible by {} attributes; \
         num_classes in the config does not match the model",
        output.len(),
        attrs
    );
    let n = output.len() / attrs;

    let mut detections = Vec::new();
    for i in 0..n {
        let cx = output[i];
        let cy = output[n + i];
        let w = output[2 * n + i];
        let h = output[3 * n + i];

        let mut best_conf = 0.0f32;
        let mut best_class = 0;
        for c in 0..config.num_classes {
            let conf = output[(4 + c) * n + i];
            if conf > best_conf {
                best_conf = conf;
                best_class = c;
            }
        }

        if best_conf < config.confidence_threshold
            || !config.vehicle_class_ids.contains(&best_class)
        {
            continue;
        }

        let bbox = letterbox.to_source([
            cx - w / 2.0,
            cy - h / 2.0,
            cx + w / 2.0,
            cy + h / 2.0,
        ]);

        detections.push(Detection {
            bbox,
            confidence: best_conf,
            class_id: best_class,
        });
    }

    Ok(detections)
}

fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    while !detections.is_empty() {
        let current = detections.remove(0);
        detections.retain(|det| iou(&current.bbox, &det.bbox) < iou_threshold);
        keep.push(current);
    }
    keep
}

fn iou(box1: &[f32; 4], box2: &[f32; 4]) -> f32 {
    let x1 = box1[0].max(box2[0]);
    let y1 = box1[1].max(box2[1]);
    let x2 = box1[2].min(box2[2]);
    let y2 = box1[3].min(box2[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = (box1[2] - box1[0]) * (box1[3] - box1[1]);
    let area2 = (box2[2] - box2[0]) * (box2[3] - box2[1]);
    let union = area1 + area2 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_model_config() -> ModelConfig {
        ModelConfig {
            path: "test.onnx".to_string(),
            input_size: 640,
            num_classes: 2,
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            vehicle_class_ids: vec![0],
            num_threads: 1,
        }
    }

    /// Flat [4+nc][n] tensor from per-anchor rows of [cx, cy, w, h, conf...].
    fn flat_output(rows: &[Vec<f32>]) -> Vec<f32> {
        let n = rows.len();
        let attrs = rows[0].len();
        let mut out = vec![0.0; attrs * n];
        for (i, row) in rows.iter().enumerate() {
            for (a, v) in row.iter().enumerate() {
                out[a * n + i] = *v;
            }
        }
        out
    }

    #[test]
    fn letterbox_pads_the_short_axis() {
        let src = vec![0u8; 640 * 480 * 3];
        let (input, lb) = letterbox_chw(&src, 640, 480, 640);
        assert_eq!(input.len(), 3 * 640 * 640);
        assert_eq!(lb.scale, 1.0);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 80.0);
    }

    #[test]
    fn letterbox_inverse_maps_back_to_source() {
        let lb = Letterbox {
            scale: 0.5,
            pad_x: 0.0,
            pad_y: 80.0,
        };
        let bbox = lb.to_source([100.0, 130.0, 200.0, 230.0]);
        assert_eq!(bbox, [200.0, 100.0, 400.0, 300.0]);
    }

    #[test]
    fn resize_preserves_solid_color() {
        let src = vec![200u8; 100 * 100 * 3];
        let dst = resize_bilinear(&src, 100, 100, 50, 50);
        assert_eq!(dst.len(), 50 * 50 * 3);
        assert!(dst.iter().all(|&v| v == 200));
    }

    #[test]
    fn parse_keeps_confident_vehicle_classes_only() {
        let config = test_model_config();
        let lb = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let output = flat_output(&[
            vec![100.0, 100.0, 40.0, 20.0, 0.9, 0.1], // kept
            vec![300.0, 100.0, 40.0, 20.0, 0.2, 0.1], // below threshold
            vec![500.0, 100.0, 40.0, 20.0, 0.1, 0.9], // class 1, filtered out
        ]);

        let detections = parse_predictions(&output, &config, lb).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 0);
        assert_eq!(detections[0].bbox, [80.0, 90.0, 120.0, 110.0]);
        assert_eq!(detections[0].center_x(), 100.0);
    }

    #[test]
    fn parse_rejects_mismatched_output_length() {
        let config = test_model_config();
        let lb = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        assert!(parse_predictions(&[0.0; 7], &config, lb).is_err());
    }

    #[test]
    fn nms_suppresses_overlapping_boxes() {
        let detections = vec![
            Detection {
                bbox: [0.0, 0.0, 100.0, 100.0],
                confidence: 0.9,
                class_id: 0,
            },
            Detection {
                bbox: [5.0, 5.0, 105.0, 105.0],
                confidence: 0.8,
                class_id: 0,
            },
            Detection {
                bbox: [300.0, 300.0, 400.0, 400.0],
                confidence: 0.7,
                class_id: 0,
            },
        ];
        let kept = nms(detections, 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].bbox, [300.0, 300.0, 400.0, 400.0]);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        assert_eq!(
            iou(&[0.0, 0.0, 10.0, 10.0], &[20.0, 20.0, 30.0, 30.0]),
            0.0
        );
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = [10.0, 10.0, 50.0, 50.0];
        assert!((iou(&b, &b) - 1.0).abs() < 1e-6);
    }
}
