use crate::detection::Detection;
use crate::types::LaneCounts;

/// Partition detections into the two lanes by bounding-box horizontal
/// midpoint. Lane A is the left half; a midpoint exactly on the centerline
/// counts for lane B.
pub fn count_lanes(detections: &[Detection], frame_width: usize) -> LaneCounts {
    let centerline = frame_width as f32 / 2.0;

    let mut counts = LaneCounts::default();
    for detection in detections {
        if detection.center_x() < centerline {
            counts.lane_a += 1;
        } else {
            counts.lane_b += 1;
        }
    }
    counts
}
