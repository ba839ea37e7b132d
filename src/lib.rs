//! Side-channel leakage simulators.
//!
//! Three channels share one shape: a [`LeakageModel`] turns a secret and a
//! stream of inputs into noisy measurements, a [`SimulationSession`] drives it
//! in batches and keeps the [`TraceHistory`], and for the cache channel the
//! [`KeyRecoverer`] votes the key back out of the trace.

pub mod cache;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod leakage;
pub mod noise;
pub mod power;
pub mod recover;
pub mod session;
pub mod stats;
pub mod timing;
pub mod tools;
pub mod trace;

pub use cache::CacheLeakageModel;
pub use config::{Config, SessionConfig};
pub use error::{Error, Result};
pub use leakage::{hamming_distance, hamming_weight, Batch, LeakageModel, ModelKind, Sample};
pub use noise::NoiseModel;
pub use power::PowerLeakageModel;
pub use recover::{KeyGuess, KeyRecoverer, RecoveryEstimate};
pub use session::{SessionState, SimulationSession, Tick};
pub use timing::TimingLeakageModel;
pub use trace::{TraceHistory, TraceWindow};
