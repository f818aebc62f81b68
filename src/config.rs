// src/config.rs

use crate::types::Config;
use anyhow::Result;
use std::fs;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let a = &self.analysis;
        if a.frame_skip < 1 {
            anyhow::bail!("analysis.frame_skip must be >= 1");
        }
        if a.min_track_length < 1 {
            anyhow::bail!("analysis.min_track_length must be >= 1");
        }
        if !(a.tracking_threshold > 0.0 && a.tracking_threshold <= 1.0) {
            anyhow::bail!("analysis.tracking_threshold must be in (0, 1]");
        }
        if a.max_tracks < 1 {
            anyhow::bail!("analysis.max_tracks must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.model.confidence_threshold) {
            anyhow::bail!("model.confidence_threshold must be in [0, 1]");
        }
        Ok(())
    }
}
