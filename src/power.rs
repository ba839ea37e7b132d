//! Hamming weight / Hamming distance power model of a data bus.

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{ensure_non_negative, Error, Result};
use crate::leakage::{
    hamming_distance, hamming_weight, sealed, Batch, LeakageModel, ModelKind, Sample,
};
use crate::noise::NoiseModel;

pub const BIT_WIDTH: u32 = 8;
pub const BASE_POWER: f64 = 1.0;
pub const TRANSITION_POWER: f64 = 0.5;
pub const LEAKAGE_POWER: f64 = 0.1;

/// Power drawn by a bus of `bit_width` lines.
///
/// Each word costs a static part proportional to its Hamming weight and a
/// dynamic part proportional to the bits flipped since the previous word,
/// so successive calls to [`calculate_power`](Self::calculate_power) depend
/// on each other.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerLeakageModel {
    bit_width: u32,
    base_power: f64,
    transition_power: f64,
    leakage_power: f64,
    previous_value: u32,
}

impl Default for PowerLeakageModel {
    fn default() -> Self {
        Self {
            bit_width: BIT_WIDTH,
            base_power: BASE_POWER,
            transition_power: TRANSITION_POWER,
            leakage_power: LEAKAGE_POWER,
            previous_value: 0,
        }
    }
}

impl PowerLeakageModel {
    pub fn new(
        bit_width: u32,
        base_power: f64,
        transition_power: f64,
        leakage_power: f64,
    ) -> Result<Self> {
        if !(1..=32).contains(&bit_width) {
            return Err(Error::config(
                "bit_width",
                format!("{bit_width} is outside 1..=32"),
            ));
        }
        ensure_non_negative("base_power", base_power)?;
        ensure_non_negative("transition_power", transition_power)?;
        ensure_non_negative("leakage_power", leakage_power)?;
        Ok(Self {
            bit_width,
            base_power,
            transition_power,
            leakage_power,
            previous_value: 0,
        })
    }

    pub fn bit_width(&self) -> u32 {
        self.bit_width
    }

    pub fn base_power(&self) -> f64 {
        self.base_power
    }

    pub fn previous_value(&self) -> u32 {
        self.previous_value
    }

    /// Largest word representable on the bus.
    pub fn max_value(&self) -> u32 {
        if self.bit_width == 32 {
            u32::MAX
        } else {
            (1u32 << self.bit_width) - 1
        }
    }

    pub fn calculate_power(&mut self, current: u32) -> f64 {
        let transitions = hamming_distance(current, self.previous_value);
        let active_bits = hamming_weight(current);
        let power = self.base_power
            + self.leakage_power * f64::from(active_bits)
            + self.transition_power * f64::from(transitions);
        self.previous_value = current;
        power
    }

    /// One power value per word, in order.
    pub fn simulate_sequence(&mut self, values: &[u32], reset: bool) -> Array1<f64> {
        if reset {
            self.reset_bus();
        }
        values.iter().map(|&v| self.calculate_power(v)).collect()
    }

    /// Draws `n` uniform words and runs them through a fresh sequence.
    pub fn simulate_random(&mut self, n: usize, seed: Option<u64>) -> (Array1<u32>, Array1<f64>) {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let max = self.max_value();
        let data: Vec<u32> = (0..n).map(|_| rng.gen_range(0..=max)).collect();
        let power = self.simulate_sequence(&data, true);
        (Array1::from(data), power)
    }

    fn reset_bus(&mut self) {
        self.previous_value = 0;
    }
}

impl sealed::Sealed for PowerLeakageModel {}

impl LeakageModel for PowerLeakageModel {
    type Input = u32;
    /// The bus model carries no secret.
    type Secret = ();

    const KIND: ModelKind = ModelKind::Power;

    fn generate_batch<R: Rng>(&mut self, n: usize, noise: &mut NoiseModel<R>) -> Batch<u32> {
        let max = self.max_value();
        let mut batch = Batch::with_capacity(n);
        for _ in 0..n {
            let word = noise.rng_mut().gen_range(0..=max);
            let measurement = self.calculate_power(word);
            batch.push(Sample {
                input: word,
                measurement,
                label: hamming_weight(word),
            });
        }
        batch
    }

    fn label_for(&self, input: &u32) -> u32 {
        hamming_weight(*input)
    }

    fn reset(&mut self) {
        self.reset_bus();
    }

    fn rekey(&mut self, _secret: ()) -> Result<()> {
        self.reset_bus();
        Ok(())
    }

    fn secret(&self) {}

    fn encode_input(input: &u32) -> Option<u32> {
        Some(*input)
    }

    fn describe_input(input: &u32) -> String {
        format!("{input:#x}")
    }
}
