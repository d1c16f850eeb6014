use crate::gpio::LightBank;
use crate::types::{LaneCounts, TimingConfig};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Poll granularity while blocking inside a phase, so an interrupt is
/// noticed without waiting out a 20 s green.
const STOP_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightColor {
    Red,
    Yellow,
    Green,
}

impl LightColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            LightColor::Red => "red",
            LightColor::Yellow => "yellow",
            LightColor::Green => "green",
        }
    }
}

/// One step of the signal cycle: a color per lane, held for `duration`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Phase {
    pub lane_a: LightColor,
    pub lane_b: LightColor,
    pub duration: Duration,
}

/// Green/yellow durations computed for one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingPlan {
    pub green_a: Duration,
    pub green_b: Duration,
    pub yellow: Duration,
}

impl TimingPlan {
    /// Allocate green time proportionally to each lane's share of the total
    /// count, clamped into [min, max]. An empty junction gets the base
    /// duration on both lanes.
    pub fn from_counts(counts: &LaneCounts, timing: &TimingConfig) -> Self {
        let total = counts.total();
        let (green_a, green_b) = if total == 0 {
            (timing.base_green_secs, timing.base_green_secs)
        } else {
            (
                allocate_green(counts.lane_a, total, timing),
                allocate_green(counts.lane_b, total, timing),
            )
        };

        Self {
            green_a: Duration::from_secs_f64(green_a),
            green_b: Duration::from_secs_f64(green_b),
            yellow: Duration::from_secs_f64(timing.yellow_secs),
        }
    }
}

fn allocate_green(lane_count: usize, total: usize, timing: &TimingConfig) -> f64 {
    let share = lane_count as f64 / total as f64;
    let green = timing.min_green_secs + share * (timing.max_green_secs - timing.min_green_secs);
    green.clamp(timing.min_green_secs, timing.max_green_secs)
}

/// The fixed four-phase sequence. Order never depends on the counts.
pub fn cycle(plan: &TimingPlan) -> [Phase; 4] {
    [
        Phase {
            lane_a: LightColor::Green,
            lane_b: LightColor::Red,
            duration: plan.green_a,
        },
        Phase {
            lane_a: LightColor::Yellow,
            lane_b: LightColor::Red,
            duration: plan.yellow,
        },
        Phase {
            lane_a: LightColor::Red,
            lane_b: LightColor::Green,
            duration: plan.green_b,
        },
        Phase {
            lane_a: LightColor::Red,
            lane_b: LightColor::Yellow,
            duration: plan.yellow,
        },
    ]
}

/// Drive one full cycle on the bank, blocking for each phase duration.
/// Returns false when the stop flag cut the cycle short.
pub fn run_cycle(bank: &mut dyn LightBank, plan: &TimingPlan, stop: &AtomicBool) -> Result<bool> {
    for phase in cycle(plan) {
        if stop.load(Ordering::SeqCst) {
            return Ok(false);
        }

        debug!(
            "phase: lane A {} / lane B {} for {:.1}s",
            phase.lane_a.as_str(),
            phase.lane_b.as_str(),
            phase.duration.as_secs_f64()
        );
        bank.apply(phase.lane_a, phase.lane_b)?;

        if !sleep_unless_stopped(phase.duration, stop) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        thread::sleep((deadline - now).min(STOP_POLL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::MockLightBank;

    fn timing() -> TimingConfig {
        TimingConfig {
            base_green_secs: 10.0,
            min_green_secs: 5.0,
            max_green_secs: 20.0,
            yellow_secs: 3.0,
        }
    }

    fn secs(d: Duration) -> f64 {
        d.as_secs_f64()
    }

    #[test]
    fn empty_junction_gets_base_green_on_both_lanes() {
        let plan = TimingPlan::from_counts(&LaneCounts::default(), &timing());
        assert_eq!(secs(plan.green_a), 10.0);
        assert_eq!(secs(plan.green_b), 10.0);
        assert_eq!(secs(plan.yellow), 3.0);
    }

    #[test]
    fn one_sided_traffic_pins_durations_to_the_bounds() {
        let counts = LaneCounts {
            lane_a: 12,
            lane_b: 0,
        };
        let plan = TimingPlan::from_counts(&counts, &timing());
        assert_eq!(secs(plan.green_a), 20.0);
        assert_eq!(secs(plan.green_b), 5.0);
    }

    #[test]
    fn balanced_traffic_splits_the_green_budget_evenly() {
        let counts = LaneCounts {
            lane_a: 3,
            lane_b: 3,
        };
        let plan = TimingPlan::from_counts(&counts, &timing());
        assert_eq!(secs(plan.green_a), 12.5);
        assert_eq!(secs(plan.green_b), 12.5);
    }

    #[test]
    fn durations_stay_within_bounds_for_any_counts() {
        let timing = timing();
        for a in 0..30usize {
            for b in 0..30usize {
                let plan = TimingPlan::from_counts(&LaneCounts { lane_a: a, lane_b: b }, &timing);
                for green in [plan.green_a, plan.green_b] {
                    assert!(secs(green) >= timing.min_green_secs);
                    assert!(secs(green) <= timing.max_green_secs);
                }
            }
        }
    }

    #[test]
    fn degenerate_equal_bounds_yield_a_constant_green() {
        let timing = TimingConfig {
            base_green_secs: 7.0,
            min_green_secs: 7.0,
            max_green_secs: 7.0,
            yellow_secs: 3.0,
        };
        let counts = LaneCounts {
            lane_a: 9,
            lane_b: 1,
        };
        let plan = TimingPlan::from_counts(&counts, &timing);
        assert_eq!(secs(plan.green_a), 7.0);
        assert_eq!(secs(plan.green_b), 7.0);
    }

    #[test]
    fn cycle_order_is_fixed() {
        let plan = TimingPlan::from_counts(
            &LaneCounts {
                lane_a: 5,
                lane_b: 1,
            },
            &timing(),
        );
        let phases = cycle(&plan);
        let states: Vec<(LightColor, LightColor)> =
            phases.iter().map(|p| (p.lane_a, p.lane_b)).collect();
        assert_eq!(
            states,
            vec![
                (LightColor::Green, LightColor::Red),
                (LightColor::Yellow, LightColor::Red),
                (LightColor::Red, LightColor::Green),
                (LightColor::Red, LightColor::Yellow),
            ]
        );
        assert_eq!(phases[1].duration, phases[3].duration);
    }

    #[test]
    fn run_cycle_applies_all_four_phases_in_order() {
        let plan = TimingPlan {
            green_a: Duration::ZERO,
            green_b: Duration::ZERO,
            yellow: Duration::ZERO,
        };
        let mut bank = MockLightBank::default();
        let stop = AtomicBool::new(false);

        let completed = run_cycle(&mut bank, &plan, &stop).unwrap();
        assert!(completed);
        assert_eq!(
            bank.applied,
            vec![
                (LightColor::Green, LightColor::Red),
                (LightColor::Yellow, LightColor::Red),
                (LightColor::Red, LightColor::Green),
                (LightColor::Red, LightColor::Yellow),
            ]
        );
    }

    #[test]
    fn run_cycle_stops_before_applying_when_flagged() {
        let plan = TimingPlan {
            green_a: Duration::ZERO,
            green_b: Duration::ZERO,
            yellow: Duration::ZERO,
        };
        let mut bank = MockLightBank::default();
        let stop = AtomicBool::new(true);

        let completed = run_cycle(&mut bank, &plan, &stop).unwrap();
        assert!(!completed);
        assert!(bank.applied.is_empty());
    }
}
