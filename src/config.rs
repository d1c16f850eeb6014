use crate::types::Config;
use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.timing;
        if t.min_green_secs <= 0.0 || t.yellow_secs <= 0.0 {
            bail!("timing: green and yellow durations must be positive");
        }
        if !(t.min_green_secs <= t.base_green_secs && t.base_green_secs <= t.max_green_secs) {
            bail!(
                "timing: expected min <= base <= max green, got {} / {} / {}",
                t.min_green_secs,
                t.base_green_secs,
                t.max_green_secs
            );
        }

        if self.detection.inference_interval == 0 {
            bail!("detection: inference_interval must be at least 1");
        }

        let pins: Vec<u8> = self
            .gpio
            .lane_a
            .all()
            .into_iter()
            .chain(self.gpio.lane_b.all())
            .collect();
        let unique: HashSet<u8> = pins.iter().copied().collect();
        if unique.len() != pins.len() {
            bail!("gpio: the six output pins must be distinct, got {:?}", pins);
        }

        if self.camera.width <= 0 || self.camera.height <= 0 || self.camera.fps == 0 {
            bail!("camera: width, height and fps must be positive");
        }

        if self.model.input_size == 0 || self.model.num_classes == 0 {
            bail!("model: input_size and num_classes must be positive");
        }
        if self.model.vehicle_class_ids.is_empty() {
            bail!("model: vehicle_class_ids must name at least one class");
        }
        if let Some(bad) = self
            .model
            .vehicle_class_ids
            .iter()
            .find(|&&id| id >= self.model.num_classes)
        {
            bail!(
                "model: class id {} out of range for {} classes",
                bad,
                self.model.num_classes
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn parses_partial_yaml_with_defaults() {
        let yaml = "timing:\n  base_green_secs: 8.0\nlogging:\n  level: debug\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.timing.base_green_secs, 8.0);
        assert_eq!(config.timing.yellow_secs, 3.0);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.camera.width, 640);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_duplicate_pins() {
        let mut config = Config::default();
        config.gpio.lane_b.red = config.gpio.lane_a.red;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_green_bounds() {
        let mut config = Config::default();
        config.timing.min_green_secs = 25.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_inference_interval() {
        let mut config = Config::default();
        config.detection.inference_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_class_id_out_of_range() {
        let mut config = Config::default();
        config.model.vehicle_class_ids = vec![3];
        assert!(config.validate().is_err());
    }
}
