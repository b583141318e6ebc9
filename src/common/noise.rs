use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use super::error::ConfigError;

/// Per-peer randomness: channel noise and link availability draws.
pub struct NoiseSource {
    rng: ChaCha8Rng,
    normal: Normal<f64>,
}

impl NoiseSource {
    pub fn new(mean: f64, std_dev: f64, seed: u64) -> Result<Self, ConfigError> {
        let normal =
            Normal::new(mean, std_dev).map_err(|err| ConfigError::InvalidNoise(err.to_string()))?;
        Ok(NoiseSource {
            rng: ChaCha8Rng::seed_from_u64(seed),
            normal,
        })
    }

    /// Observation of `value` as seen through a noisy channel.
    pub fn perturb(&mut self, value: f64) -> f64 {
        value + self.normal.sample(&mut self.rng)
    }

    /// Uniform draw in [0, 1).
    pub fn draw(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}
