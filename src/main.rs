// src/main.rs

mod camera;
mod config;
mod detection;
mod gpio;
mod lane_counter;
mod lights;
mod types;
mod video_out;

use anyhow::Result;
use camera::Camera;
use detection::VehicleDetector;
use gpio::LightBank;
use lights::TimingPlan;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use types::Config;
use video_out::VideoSink;

#[derive(Debug, Default)]
struct RunStats {
    frames_captured: u64,
    frames_inferred: u64,
    vehicles_lane_a: usize,
    vehicles_lane_b: usize,
    cycles_completed: u64,
}

fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(format!("traffic_lights={},ort=warn", config.logging.level))
        .init();

    info!("🚦 Adaptive Traffic Light Controller starting");
    info!("✓ Configuration loaded from {}", config_path);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })?;
    }

    let mut camera = match Camera::open(&config.camera) {
        Ok(camera) => camera,
        Err(e) => {
            error!("Error configuring camera: {:#}", e);
            std::process::exit(1);
        }
    };

    let mut detector = match VehicleDetector::new(&config.model) {
        Ok(detector) => detector,
        Err(e) => {
            error!("Error loading detection model: {:#}", e);
            std::process::exit(1);
        }
    };

    let mut bank = gpio::open_bank(&config.gpio)?;
    let mut sink = VideoSink::create(&config.video, camera.width, camera.height, camera.fps)?;

    info!("Camera started, recording... Press Ctrl+C to stop.");

    let started = Instant::now();
    let result = run_loop(
        &config,
        &mut camera,
        &mut detector,
        bank.as_mut(),
        sink.as_mut(),
        &stop,
        started,
    );

    // Safe state and sink release happen on every exit path.
    if let Err(e) = bank.all_off() {
        warn!("failed to reset outputs to the safe state: {:#}", e);
    }
    if let Some(ref mut sink) = sink {
        if let Err(e) = sink.release() {
            warn!("failed to finalize the output video: {:#}", e);
        }
    }

    let stats = result?;
    let elapsed = started.elapsed().as_secs_f64();

    info!("📊 Final Report:");
    info!("  Frames captured: {}", stats.frames_captured);
    info!("  Frames inferred: {}", stats.frames_inferred);
    info!(
        "  Vehicles counted: {} lane A / {} lane B",
        stats.vehicles_lane_a, stats.vehicles_lane_b
    );
    info!("  Signal cycles completed: {}", stats.cycles_completed);
    if elapsed > 0.0 {
        info!(
            "  Capture rate: {:.1} FPS over {:.1}s",
            stats.frames_captured as f64 / elapsed,
            elapsed
        );
    }
    if config.video.save_annotated {
        info!("Recording stopped, video saved to {}", config.video.output_path);
    }

    Ok(())
}

fn run_loop(
    config: &Config,
    camera: &mut Camera,
    detector: &mut VehicleDetector,
    bank: &mut dyn LightBank,
    mut sink: Option<&mut VideoSink>,
    stop: &AtomicBool,
    started: Instant,
) -> Result<RunStats> {
    let mut stats = RunStats::default();
    let max_runtime = config.video.max_runtime_seconds.map(Duration::from_secs);

    while !stop.load(Ordering::SeqCst) {
        if let Some(limit) = max_runtime {
            if started.elapsed() >= limit {
                info!("Runtime budget of {}s reached, stopping", limit.as_secs());
                break;
            }
        }

        let frame = camera.read_frame()?;
        stats.frames_captured += 1;

        // Only every Nth frame is inferred; the rest pass straight through.
        if stats.frames_captured % config.detection.inference_interval != 0 {
            if let Some(sink) = sink.as_deref_mut() {
                sink.write_raw(&frame)?;
            }
            continue;
        }

        debug!(
            "inferring frame {} at {:.0} ms",
            stats.frames_captured, frame.timestamp_ms
        );
        let detections = detector.detect(&frame)?;
        stats.frames_inferred += 1;

        let counts = lane_counter::count_lanes(&detections, frame.width);
        stats.vehicles_lane_a += counts.lane_a;
        stats.vehicles_lane_b += counts.lane_b;

        let plan = TimingPlan::from_counts(&counts, &config.timing);
        info!(
            "Lane A: {} cars, green for {:.1}s | Lane B: {} cars, green for {:.1}s",
            counts.lane_a,
            plan.green_a.as_secs_f64(),
            counts.lane_b,
            plan.green_b.as_secs_f64()
        );

        if lights::run_cycle(bank, &plan, stop)? {
            stats.cycles_completed += 1;
        }

        if let Some(sink) = sink.as_deref_mut() {
            sink.write_annotated(&frame, &detections, &counts)?;
        }
    }

    if stop.load(Ordering::SeqCst) {
        info!("Interrupt received, stopping...");
    }

    Ok(stats)
}
