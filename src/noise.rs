use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Gaussian jitter source shared by all leakage models.
///
/// The same RNG also backs the uniform input draws of the models, so a
/// seeded `NoiseModel` makes a whole session reproducible.
#[derive(Debug, Clone)]
pub struct NoiseModel<R: Rng = StdRng> {
    rng: R,
}

impl NoiseModel<StdRng> {
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    /// Seeded when `seed` is given, entropy-backed otherwise.
    pub fn from_seed_opt(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed),
            None => Self::from_entropy(),
        }
    }
}

impl<R: Rng> NoiseModel<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Draws from N(0, std_dev^2). A zero deviation gives exactly `0.0`.
    pub fn sample(&mut self, std_dev: f64) -> f64 {
        debug_assert!(std_dev >= 0.0, "negative std_dev {std_dev}");
        if std_dev == 0.0 {
            return 0.0;
        }
        let z: f64 = self.rng.sample(StandardNormal);
        z * std_dev
    }

    pub fn rng_mut(&mut self) -> &mut R {
        &mut self.rng
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_deviation_is_noise_free() {
        let mut noise = NoiseModel::seeded(7);
        for _ in 0..100 {
            assert_eq!(noise.sample(0.0), 0.0);
        }
    }

    #[test]
    fn same_seed_same_draws() {
        let mut a = NoiseModel::seeded(42);
        let mut b = NoiseModel::seeded(42);
        for _ in 0..50 {
            assert_eq!(a.sample(5.0), b.sample(5.0));
        }
    }

    #[test]
    fn sample_moments_match() {
        let mut noise = NoiseModel::seeded(1);
        let n = 20_000;
        let draws: Vec<f64> = (0..n).map(|_| noise.sample(3.0)).collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.1, "mean {mean}");
        assert!((var.sqrt() - 3.0).abs() < 0.1, "std {}", var.sqrt());
    }
}
