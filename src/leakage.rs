use std::fmt;

use num_traits::PrimInt;
use rand::Rng;

use crate::error::Result;
use crate::noise::NoiseModel;
use crate::recover::RecoveryEstimate;
use crate::trace::TraceHistory;

/// Population count.
pub fn hamming_weight<T: PrimInt>(value: T) -> u32 {
    value.count_ones()
}

/// Number of differing bits between `a` and `b`.
pub fn hamming_distance<T: PrimInt>(a: T, b: T) -> u32 {
    hamming_weight(a ^ b)
}

/// One observation: the stimulus, its noisy leakage and the ground truth label.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample<I> {
    pub input: I,
    pub measurement: f64,
    pub label: u32,
}

/// Samples produced by a single `generate_batch` call, in generation order.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<I> {
    samples: Vec<Sample<I>>,
}

impl<I> Batch<I> {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            samples: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, sample: Sample<I>) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample<I>] {
        &self.samples
    }

    pub fn measurements(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.measurement).collect()
    }

    pub fn labels(&self) -> Vec<u32> {
        self.samples.iter().map(|s| s.label).collect()
    }
}

impl<I> IntoIterator for Batch<I> {
    type Item = Sample<I>;
    type IntoIter = std::vec::IntoIter<Sample<I>>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.into_iter()
    }
}

impl<I> FromIterator<Sample<I>> for Batch<I> {
    fn from_iter<T: IntoIterator<Item = Sample<I>>>(iter: T) -> Self {
        Self {
            samples: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Cache,
    Power,
    Timing,
}

impl ModelKind {
    pub fn name(self) -> &'static str {
        match self {
            ModelKind::Cache => "cache",
            ModelKind::Power => "power",
            ModelKind::Timing => "timing",
        }
    }

    /// Display window used for the live trace of this channel.
    pub fn default_window(self) -> usize {
        match self {
            ModelKind::Cache | ModelKind::Power => 100,
            ModelKind::Timing => 200,
        }
    }

    pub fn default_batch_size(self) -> usize {
        match self {
            ModelKind::Cache => 50,
            ModelKind::Power => 5,
            ModelKind::Timing => 10,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// Maps a secret-dependent internal state to a noisy observable.
///
/// Implemented by exactly three models: [`CacheLeakageModel`],
/// [`PowerLeakageModel`] and [`TimingLeakageModel`].
///
/// [`CacheLeakageModel`]: crate::cache::CacheLeakageModel
/// [`PowerLeakageModel`]: crate::power::PowerLeakageModel
/// [`TimingLeakageModel`]: crate::timing::TimingLeakageModel
pub trait LeakageModel: sealed::Sealed {
    /// Externally visible stimulus.
    type Input: Clone + fmt::Debug + Send + 'static;
    type Secret: Clone + fmt::Debug;

    const KIND: ModelKind;

    /// Produces `n` samples, drawing inputs and jitter from `noise`.
    fn generate_batch<R: Rng>(&mut self, n: usize, noise: &mut NoiseModel<R>)
        -> Batch<Self::Input>;

    /// Ground truth label of an input under the current secret.
    fn label_for(&self, input: &Self::Input) -> u32;

    /// Clears sequential state. Stateless models do nothing.
    fn reset(&mut self) {}

    /// Replaces the secret and clears sequential state.
    fn rekey(&mut self, secret: Self::Secret) -> Result<()>;

    fn secret(&self) -> Self::Secret;

    /// Numeric form of an input for array export, `None` for non-numeric inputs.
    fn encode_input(input: &Self::Input) -> Option<u32>;

    /// Textual form of an input for tabular export.
    fn describe_input(input: &Self::Input) -> String;

    /// Recovers the secret from the history when the channel supports it.
    fn analyze(&self, _history: &TraceHistory<Self::Input>) -> Option<RecoveryEstimate> {
        None
    }
}
