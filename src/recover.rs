//! Majority-vote key recovery for the Flush+Reload channel.

use std::fmt;
use std::ops::Add;

use ndarray::Array1;
use rayon::prelude::{IntoParallelIterator, ParallelIterator};

use crate::cache::CacheLeakageModel;
use crate::error::{Error, Result};
use crate::leakage::LeakageModel;
use crate::noise::NoiseModel;

/// Reload latency separating hits from misses.
pub const DEFAULT_THRESHOLD: f64 = 100.0;
/// Confidence at which the key counts as recovered.
pub const CRACKED_CONFIDENCE: f64 = 0.9;

const GUESS_RANGE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyGuess {
    Known(u8),
    /// No fast reload observed yet.
    Unknown,
}

impl fmt::Display for KeyGuess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyGuess::Known(key) => write!(f, "{key:#04x}"),
            KeyGuess::Unknown => f.write_str("unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecoveryEstimate {
    pub guess: KeyGuess,
    /// Share of fast samples voting for `guess`, in `[0, 1]`.
    pub confidence: f64,
}

impl RecoveryEstimate {
    pub const UNKNOWN: RecoveryEstimate = RecoveryEstimate {
        guess: KeyGuess::Unknown,
        confidence: 0.0,
    };

    pub fn is_cracked(&self) -> bool {
        matches!(self.guess, KeyGuess::Known(_)) && self.confidence >= CRACKED_CONFIDENCE
    }
}

pub struct KeyRecoverer;

impl KeyRecoverer {
    /// Votes for `plaintext ^ monitored_index` over every sample faster than
    /// `threshold`.
    ///
    /// Only the true key maps a plaintext onto the monitored line, so the
    /// most voted value is the key. Ties go to the lowest value. Without any
    /// fast sample the estimate is [`RecoveryEstimate::UNKNOWN`].
    pub fn infer(
        inputs: &[u8],
        measurements: &[f64],
        monitored_index: u8,
        threshold: f64,
    ) -> Result<RecoveryEstimate> {
        if inputs.len() != measurements.len() {
            return Err(Error::LengthMismatch {
                inputs: inputs.len(),
                measurements: measurements.len(),
            });
        }

        let mut votes: Array1<usize> = Array1::zeros(GUESS_RANGE);
        let mut fast = 0usize;
        for (&plaintext, &t) in inputs.iter().zip(measurements) {
            if t < threshold {
                votes[usize::from(plaintext ^ monitored_index)] += 1;
                fast += 1;
            }
        }
        if fast == 0 {
            return Ok(RecoveryEstimate::UNKNOWN);
        }

        let mut best_count = 0usize;
        let mut guess = 0usize;
        for (key, &count) in votes.iter().enumerate() {
            if count > best_count {
                best_count = count;
                guess = key;
            }
        }

        Ok(RecoveryEstimate {
            guess: KeyGuess::Known(guess as u8),
            confidence: best_count as f64 / fast as f64,
        })
    }
}

/// Recovery outcome after a given number of traces, averaged over trials.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuccessPoint {
    pub traces: usize,
    pub success_rate: f64,
    pub mean_confidence: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    trials: usize,
    successes: usize,
    confidence: f64,
}

impl Add for Tally {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            trials: self.trials + rhs.trials,
            successes: self.successes + rhs.successes,
            confidence: self.confidence + rhs.confidence,
        }
    }
}

/// Success rate of [`KeyRecoverer::infer`] against `model` for each entry of
/// `trace_counts`.
///
/// Trials run in parallel; trial `t` uses its own RNG seeded with `seed + t`,
/// so the result only depends on the arguments.
pub fn success_rate(
    model: &CacheLeakageModel,
    trace_counts: &[usize],
    trials: usize,
    seed: u64,
) -> Vec<SuccessPoint> {
    trace_counts
        .iter()
        .map(|&traces| {
            let tally = (0..trials)
                .into_par_iter()
                .map(|trial| {
                    let mut model = model.clone();
                    let mut noise = NoiseModel::seeded(seed.wrapping_add(trial as u64));
                    let batch = model.generate_batch(traces, &mut noise);
                    let inputs: Vec<u8> = batch.samples().iter().map(|s| s.input).collect();
                    let estimate = KeyRecoverer::infer(
                        &inputs,
                        &batch.measurements(),
                        model.monitored_index(),
                        model.threshold(),
                    )
                    .unwrap_or(RecoveryEstimate::UNKNOWN);
                    Tally {
                        trials: 1,
                        successes: usize::from(estimate.guess == KeyGuess::Known(model.secret())),
                        confidence: estimate.confidence,
                    }
                })
                .reduce(Tally::default, |a, b| a + b);

            let trials = tally.trials.max(1) as f64;
            SuccessPoint {
                traces,
                success_rate: tally.successes as f64 / trials,
                mean_confidence: tally.confidence / trials,
            }
        })
        .collect()
}
