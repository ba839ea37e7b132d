//! Flush+Reload cache timing model.
//!
//! The victim looks up `table[plaintext ^ key]`. The attacker flushes one
//! line (`monitored_index`) and reloads it: a fast reload means the victim
//! touched that line, which happens for exactly one plaintext per key.

use rand::Rng;

use crate::error::{ensure_non_negative, Result};
use crate::leakage::{sealed, Batch, LeakageModel, ModelKind, Sample};
use crate::noise::NoiseModel;
use crate::recover::{KeyRecoverer, RecoveryEstimate, DEFAULT_THRESHOLD};
use crate::trace::TraceHistory;

pub const HIT_LATENCY: f64 = 45.0;
pub const MISS_LATENCY: f64 = 180.0;
pub const NOISE_STD: f64 = 5.0;
pub const MONITORED_INDEX: u8 = 94;
pub const SECRET: u8 = 0x5A;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheLeakageModel {
    hit_latency: f64,
    miss_latency: f64,
    noise_std: f64,
    monitored_index: u8,
    secret: u8,
    threshold: f64,
}

impl Default for CacheLeakageModel {
    fn default() -> Self {
        Self {
            hit_latency: HIT_LATENCY,
            miss_latency: MISS_LATENCY,
            noise_std: NOISE_STD,
            monitored_index: MONITORED_INDEX,
            secret: SECRET,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl CacheLeakageModel {
    pub fn new(
        hit_latency: f64,
        miss_latency: f64,
        noise_std: f64,
        monitored_index: u8,
        secret: u8,
    ) -> Result<Self> {
        ensure_non_negative("hit_latency", hit_latency)?;
        ensure_non_negative("miss_latency", miss_latency)?;
        ensure_non_negative("noise_std", noise_std)?;
        Ok(Self {
            hit_latency,
            miss_latency,
            noise_std,
            monitored_index,
            secret,
            threshold: DEFAULT_THRESHOLD,
        })
    }

    /// Sets the hit/miss threshold used by [`LeakageModel::analyze`].
    pub fn with_threshold(mut self, threshold: f64) -> Result<Self> {
        ensure_non_negative("threshold", threshold)?;
        self.threshold = threshold;
        Ok(self)
    }

    pub fn hit_latency(&self) -> f64 {
        self.hit_latency
    }

    pub fn miss_latency(&self) -> f64 {
        self.miss_latency
    }

    pub fn noise_std(&self) -> f64 {
        self.noise_std
    }

    pub fn monitored_index(&self) -> u8 {
        self.monitored_index
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn accessed_index(&self, plaintext: u8) -> u8 {
        plaintext ^ self.secret
    }

    /// Reload latency of a single victim access, clamped at zero.
    pub fn access_time<R: Rng>(&self, accessed_index: u8, noise: &mut NoiseModel<R>) -> f64 {
        let base = if accessed_index == self.monitored_index {
            self.hit_latency
        } else {
            self.miss_latency
        };
        (base + noise.sample(self.noise_std)).max(0.0)
    }
}

impl sealed::Sealed for CacheLeakageModel {}

impl LeakageModel for CacheLeakageModel {
    type Input = u8;
    type Secret = u8;

    const KIND: ModelKind = ModelKind::Cache;

    fn generate_batch<R: Rng>(&mut self, n: usize, noise: &mut NoiseModel<R>) -> Batch<u8> {
        let mut batch = Batch::with_capacity(n);
        for _ in 0..n {
            let plaintext: u8 = noise.rng_mut().gen();
            let accessed = self.accessed_index(plaintext);
            let measurement = self.access_time(accessed, noise);
            batch.push(Sample {
                input: plaintext,
                measurement,
                label: u32::from(accessed),
            });
        }
        batch
    }

    fn label_for(&self, input: &u8) -> u32 {
        u32::from(self.accessed_index(*input))
    }

    fn rekey(&mut self, secret: u8) -> Result<()> {
        self.secret = secret;
        Ok(())
    }

    fn secret(&self) -> u8 {
        self.secret
    }

    fn encode_input(input: &u8) -> Option<u32> {
        Some(u32::from(*input))
    }

    fn describe_input(input: &u8) -> String {
        format!("{input:#04x}")
    }

    fn analyze(&self, history: &TraceHistory<u8>) -> Option<RecoveryEstimate> {
        KeyRecoverer::infer(
            history.inputs(),
            history.measurements(),
            self.monitored_index,
            self.threshold,
        )
        .ok()
    }
}
