use crate::lights::LightColor;
use crate::types::GpioConfig;
use anyhow::Result;
use tracing::{debug, info};

/// Six output lines, three per lane. Applying a phase drives every line low
/// and then raises exactly one line per lane.
pub trait LightBank {
    fn apply(&mut self, lane_a: LightColor, lane_b: LightColor) -> Result<()>;

    /// Best-effort safe state: all outputs low.
    fn all_off(&mut self) -> Result<()>;
}

pub fn open_bank(config: &GpioConfig) -> Result<Box<dyn LightBank>> {
    if config.mock {
        info!("Mock light bank selected (gpio.mock)");
        return Ok(Box::new(MockLightBank::default()));
    }
    open_hardware_bank(config)
}

#[cfg(target_os = "linux")]
fn open_hardware_bank(config: &GpioConfig) -> Result<Box<dyn LightBank>> {
    let bank = hardware::RpiLightBank::open(config)?;
    info!(
        "✓ GPIO light bank ready (BCM pins, lane A {:?} / lane B {:?})",
        config.lane_a.all(),
        config.lane_b.all()
    );
    Ok(Box::new(bank))
}

#[cfg(not(target_os = "linux"))]
fn open_hardware_bank(_config: &GpioConfig) -> Result<Box<dyn LightBank>> {
    tracing::warn!("GPIO hardware is unsupported on this platform; using the mock light bank");
    Ok(Box::new(MockLightBank::default()))
}

#[cfg(target_os = "linux")]
mod hardware {
    use super::LightBank;
    use crate::lights::LightColor;
    use crate::types::{GpioConfig, LanePins};
    use anyhow::{Context, Result};
    use rppal::gpio::{Gpio, OutputPin};

    pub struct RpiLightBank {
        lane_a: LaneOutputs,
        lane_b: LaneOutputs,
    }

    struct LaneOutputs {
        red: OutputPin,
        yellow: OutputPin,
        green: OutputPin,
    }

    impl LaneOutputs {
        fn open(gpio: &Gpio, pins: &LanePins) -> Result<Self> {
            let get = |pin: u8| {
                gpio.get(pin)
                    .with_context(|| format!("failed to claim BCM pin {}", pin))
            };
            Ok(Self {
                red: get(pins.red)?.into_output_low(),
                yellow: get(pins.yellow)?.into_output_low(),
                green: get(pins.green)?.into_output_low(),
            })
        }

        fn set(&mut self, color: LightColor) {
            self.off();
            match color {
                LightColor::Red => self.red.set_high(),
                LightColor::Yellow => self.yellow.set_high(),
                LightColor::Green => self.green.set_high(),
            }
        }

        fn off(&mut self) {
            self.red.set_low();
            self.yellow.set_low();
            self.green.set_low();
        }
    }

    impl RpiLightBank {
        pub fn open(config: &GpioConfig) -> Result<Self> {
            let gpio = Gpio::new().context("failed to open GPIO character device")?;
            Ok(Self {
                lane_a: LaneOutputs::open(&gpio, &config.lane_a)?,
                lane_b: LaneOutputs::open(&gpio, &config.lane_b)?,
            })
        }
    }

    impl LightBank for RpiLightBank {
        fn apply(&mut self, lane_a: LightColor, lane_b: LightColor) -> Result<()> {
            self.lane_a.set(lane_a);
            self.lane_b.set(lane_b);
            Ok(())
        }

        fn all_off(&mut self) -> Result<()> {
            self.lane_a.off();
            self.lane_b.off();
            Ok(())
        }
    }
}

/// Stand-in bank for development hosts and tests: records every applied
/// phase instead of touching pins.
#[derive(Debug, Default)]
pub struct MockLightBank {
    pub applied: Vec<(LightColor, LightColor)>,
}

impl LightBank for MockLightBank {
    fn apply(&mut self, lane_a: LightColor, lane_b: LightColor) -> Result<()> {
        debug!(
            "mock bank: lane A {} / lane B {}",
            lane_a.as_str(),
            lane_b.as_str()
        );
        self.applied.push((lane_a, lane_b));
        Ok(())
    }

    fn all_off(&mut self) -> Result<()> {
        debug!(
            "mock bank: all outputs low ({} phase(s) applied)",
            self.applied.len()
        );
        Ok(())
    }
}
