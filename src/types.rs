use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub model: ModelConfig,
    pub detection: DetectionConfig,
    pub timing: TimingConfig,
    pub gpio: GpioConfig,
    pub video: VideoConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device_index: i32,
    pub width: i32,
    pub height: i32,
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: String,
    pub input_size: usize,
    pub num_classes: usize,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub vehicle_class_ids: Vec<usize>,
    pub num_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "models/best.onnx".to_string(),
            input_size: 640,
            num_classes: 1,
            confidence_threshold: 0.3,
            iou_threshold: 0.45,
            vehicle_class_ids: vec![0],
            num_threads: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub inference_interval: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            inference_interval: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub base_green_secs: f64,
    pub min_green_secs: f64,
    pub max_green_secs: f64,
    pub yellow_secs: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            base_green_secs: 10.0,
            min_green_secs: 5.0,
            max_green_secs: 20.0,
            yellow_secs: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub lane_a: LanePins,
    pub lane_b: LanePins,
    pub mock: bool,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            lane_a: LanePins {
                red: 17,
                yellow: 27,
                green: 22,
            },
            lane_b: LanePins {
                red: 23,
                yellow: 24,
                green: 25,
            },
            mock: false,
        }
    }
}

/// BCM pin numbers for one lane's signal head.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LanePins {
    pub red: u8,
    pub yellow: u8,
    pub green: u8,
}

impl LanePins {
    pub fn all(&self) -> [u8; 3] {
        [self.red, self.yellow, self.green]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub output_path: String,
    pub save_annotated: bool,
    pub max_runtime_seconds: Option<u64>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            output_path: "output/traffic.mp4".to_string(),
            save_annotated: true,
            max_runtime_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// One captured camera frame, tightly packed RGB.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp_ms: f64,
}

/// Per-lane vehicle counts from a single inferred frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneCounts {
    pub lane_a: usize,
    pub lane_b: usize,
}

impl LaneCounts {
    pub fn total(&self) -> usize {
        self.lane_a + self.lane_b
    }
}
