//! Early-exit password comparison timing model.

use rand::Rng;

use crate::error::{ensure_non_negative, Error, Result};
use crate::leakage::{sealed, Batch, LeakageModel, ModelKind, Sample};
use crate::noise::NoiseModel;

pub const BASE_TIME: f64 = 100.0;
pub const CHAR_DELAY: f64 = 20.0;
pub const JITTER_STD: f64 = 5.0;
pub const SECRET: &str = "admin";

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Length of the longest common prefix of `secret` and `guess`.
pub fn matched_prefix_len(secret: &str, guess: &str) -> usize {
    secret
        .chars()
        .zip(guess.chars())
        .take_while(|(s, g)| s == g)
        .count()
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimingLeakageModel {
    base_time: f64,
    char_delay: f64,
    jitter_std: f64,
    secret: String,
}

impl Default for TimingLeakageModel {
    fn default() -> Self {
        Self {
            base_time: BASE_TIME,
            char_delay: CHAR_DELAY,
            jitter_std: JITTER_STD,
            secret: SECRET.to_string(),
        }
    }
}

impl TimingLeakageModel {
    pub fn new(
        base_time: f64,
        char_delay: f64,
        jitter_std: f64,
        secret: impl Into<String>,
    ) -> Result<Self> {
        ensure_non_negative("base_time", base_time)?;
        ensure_non_negative("char_delay", char_delay)?;
        ensure_non_negative("jitter_std", jitter_std)?;
        let secret = secret.into();
        check_secret(&secret)?;
        Ok(Self {
            base_time,
            char_delay,
            jitter_std,
            secret,
        })
    }

    pub fn base_time(&self) -> f64 {
        self.base_time
    }

    pub fn char_delay(&self) -> f64 {
        self.char_delay
    }

    pub fn secret_len(&self) -> usize {
        self.secret.chars().count()
    }

    /// Noise-free cost of the comparison: one `char_delay` per position
    /// visited, the first mismatch included.
    ///
    /// An immediate mismatch therefore costs `base_time + char_delay`, not
    /// `base_time`: `compare_cost("admin", "xxxxx")` is one step above the
    /// floor. Only an empty guess costs exactly `base_time`.
    pub fn compare_cost(&self, secret: &str, guess: &str) -> f64 {
        let mut execution_time = self.base_time;
        for (s, g) in secret.chars().zip(guess.chars()) {
            execution_time += self.char_delay;
            if s != g {
                break;
            }
        }
        execution_time
    }

    /// Execution time of the early-exit comparison with jitter, clamped at
    /// zero. See [`Self::compare_cost`] for the noise-free timing, which
    /// charges the first mismatched character too.
    pub fn vulnerable_compare<R: Rng>(
        &self,
        secret: &str,
        guess: &str,
        noise: &mut NoiseModel<R>,
    ) -> f64 {
        (self.compare_cost(secret, guess) + noise.sample(self.jitter_std)).max(0.0)
    }

    /// Half the guesses are random junk, the other half share a random-length
    /// prefix with the secret, so every prefix length shows up in a batch.
    fn draw_guess<R: Rng>(&self, rng: &mut R) -> String {
        let len = self.secret_len();
        let matched = if rng.gen_bool(0.5) {
            0
        } else {
            rng.gen_range(0..=len)
        };
        let mut guess: String = self.secret.chars().take(matched).collect();
        guess.extend((matched..len).map(|_| random_letter(rng)));
        guess
    }
}

fn random_letter<R: Rng>(rng: &mut R) -> char {
    char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())])
}

fn check_secret(secret: &str) -> Result<()> {
    if secret.is_empty() {
        return Err(Error::config("secret", "password must not be empty"));
    }
    Ok(())
}

impl sealed::Sealed for TimingLeakageModel {}

impl LeakageModel for TimingLeakageModel {
    type Input = String;
    type Secret = String;

    const KIND: ModelKind = ModelKind::Timing;

    fn generate_batch<R: Rng>(&mut self, n: usize, noise: &mut NoiseModel<R>) -> Batch<String> {
        let mut batch = Batch::with_capacity(n);
        for _ in 0..n {
            let guess = self.draw_guess(noise.rng_mut());
            let measurement = self.vulnerable_compare(&self.secret, &guess, noise);
            let label = self.label_for(&guess);
            batch.push(Sample {
                input: guess,
                measurement,
                label,
            });
        }
        batch
    }

    fn label_for(&self, input: &String) -> u32 {
        matched_prefix_len(&self.secret, input) as u32
    }

    fn rekey(&mut self, secret: String) -> Result<()> {
        check_secret(&secret)?;
        self.secret = secret;
        Ok(())
    }

    fn secret(&self) -> String {
        self.secret.clone()
    }

    fn encode_input(_input: &String) -> Option<u32> {
        None
    }

    fn describe_input(input: &String) -> String {
        input.clone()
    }
}
