use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::network::PeerId;

/// Tunables shared by every peer of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub noise_mean: f64,
    pub noise_std_dev: f64,
    /// Probability that a send over a probabilistic edge is delivered.
    pub availability: f64,
    /// Upper bound on the squared deviation between a received value and the
    /// updated local value. Compared against the squared deviation as is.
    pub epsilon: f64,
    pub round_timeout_ms: u64,
    pub termination_tick_ms: u64,
    /// Rounds a peer may run before giving up on local convergence.
    pub max_rounds: u64,
    pub seed: Option<u64>,
    pub require_connected: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            noise_mean: 0.0,
            noise_std_dev: 0.05,
            availability: 0.5,
            epsilon: 0.01,
            round_timeout_ms: 5_000,
            termination_tick_ms: 5,
            max_rounds: 100_000,
            seed: None,
            require_connected: true,
        }
    }
}

impl ConsensusConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ConsensusConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.availability) {
            return Err(ConfigError::InvalidAvailability(self.availability));
        }
        if !self.epsilon.is_finite() || self.epsilon <= 0.0 {
            return Err(ConfigError::InvalidEpsilon(self.epsilon));
        }
        if !self.noise_mean.is_finite() {
            return Err(ConfigError::InvalidNoise(format!(
                "mean must be finite, got {}",
                self.noise_mean
            )));
        }
        if !self.noise_std_dev.is_finite() || self.noise_std_dev < 0.0 {
            return Err(ConfigError::InvalidNoise(format!(
                "standard deviation must be finite and non-negative, got {}",
                self.noise_std_dev
            )));
        }
        if self.round_timeout_ms == 0 {
            return Err(ConfigError::MustBePositive("round_timeout_ms"));
        }
        if self.termination_tick_ms == 0 {
            return Err(ConfigError::MustBePositive("termination_tick_ms"));
        }
        if self.max_rounds == 0 {
            return Err(ConfigError::MustBePositive("max_rounds"));
        }
        Ok(())
    }

    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    pub fn termination_tick(&self) -> Duration {
        Duration::from_millis(self.termination_tick_ms)
    }

    /// Seed for one peer's random source. Peers never share a stream.
    pub fn peer_seed(&self, id: PeerId) -> u64 {
        match self.seed {
            Some(seed) => seed ^ u64::from(id.0).wrapping_mul(0x9E37_79B9_7F4A_7C15),
            None => rand::random(),
        }
    }
}
