//! Live simulation loop shared by the three channels.
//!
//! A session owns one model, its noise source and the growing history. The
//! caller drives it with [`SimulationSession::tick`] at whatever rate its
//! display runs; `tick` never reads the clock itself.
//! [`SimulationSession::run_until`] is the wall-clock driver used by the CLI.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::leakage::LeakageModel;
use crate::noise::NoiseModel;
use crate::recover::RecoveryEstimate;
use crate::trace::TraceHistory;

pub use crate::config::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    /// Terminal. The export has fired.
    Stopped,
}

/// What the driver should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Stop,
}

pub type ExportCallback<I> = Box<dyn FnMut(&TraceHistory<I>) -> Result<()> + Send>;

pub struct SimulationSession<M: LeakageModel, R: Rng = StdRng> {
    model: M,
    noise: NoiseModel<R>,
    config: SessionConfig,
    history: TraceHistory<M::Input>,
    state: SessionState,
    estimate: Option<RecoveryEstimate>,
    on_export: Option<ExportCallback<M::Input>>,
}

impl<M: LeakageModel, R: Rng> fmt::Debug for SimulationSession<M, R>
where
    M: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationSession")
            .field("model", &self.model)
            .field("config", &self.config)
            .field("samples", &self.history.len())
            .field("state", &self.state)
            .field("estimate", &self.estimate)
            .finish()
    }
}

impl<M: LeakageModel, R: Rng> SimulationSession<M, R> {
    pub fn new(model: M, noise: NoiseModel<R>, config: SessionConfig) -> Result<Self> {
        let config = SessionConfig::new(config.batch_size, config.duration, config.window)?;
        let history = TraceHistory::new(config.window);
        let estimate = model.analyze(&history);
        Ok(Self {
            model,
            noise,
            config,
            history,
            state: SessionState::Idle,
            estimate,
            on_export: None,
        })
    }

    /// Registers the callback run once with the full history when the
    /// session stops. Replaces any earlier callback.
    pub fn on_export<F>(&mut self, callback: F)
    where
        F: FnMut(&TraceHistory<M::Input>) -> Result<()> + Send + 'static,
    {
        self.on_export = Some(Box::new(callback));
    }

    pub fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: SessionState::Running,
            });
        }
        self.state = SessionState::Running;
        info!(
            kind = %M::KIND,
            batch_size = self.config.batch_size,
            duration_secs = self.config.duration.as_secs_f64(),
            "session started"
        );
        Ok(())
    }

    /// Advances the session by one batch.
    ///
    /// Once `elapsed` exceeds the configured duration the session stops
    /// instead, which fires the export. Ticking a stopped session does
    /// nothing.
    pub fn tick(&mut self, elapsed: Duration) -> Result<Tick> {
        match self.state {
            SessionState::Idle => return Err(Error::NotStarted),
            SessionState::Stopped => return Ok(Tick::Stop),
            SessionState::Running => {}
        }

        if elapsed > self.config.duration {
            self.stop()?;
            return Ok(Tick::Stop);
        }

        let batch = self
            .model
            .generate_batch(self.config.batch_size, &mut self.noise);
        self.history.append(batch);
        self.estimate = self.model.analyze(&self.history);

        debug!(
            kind = %M::KIND,
            samples = self.history.len(),
            elapsed_secs = elapsed.as_secs_f64(),
            "tick"
        );
        Ok(Tick::Continue)
    }

    /// Moves to `Stopped` and exports the full history.
    ///
    /// The export fires at most once; stopping again is a no-op. A failing
    /// export is returned but the session stays stopped.
    pub fn stop(&mut self) -> Result<()> {
        if self.state == SessionState::Stopped {
            return Ok(());
        }
        let from = self.state;
        self.state = SessionState::Stopped;
        info!(
            kind = %M::KIND,
            from = ?from,
            samples = self.history.len(),
            "session stopped"
        );

        match self.on_export.take() {
            Some(mut export) => export(&self.history),
            None => Ok(()),
        }
    }

    /// Installs a new secret. The history was produced under the old one, so
    /// it is dropped together with the model's sequential state.
    pub fn rekey(&mut self, secret: M::Secret) -> Result<()> {
        if self.state == SessionState::Stopped {
            return Err(Error::SessionStopped);
        }
        self.model.rekey(secret)?;
        self.model.reset();
        let dropped = self.history.len();
        self.history.clear();
        self.estimate = self.model.analyze(&self.history);
        warn!(kind = %M::KIND, dropped, "secret changed, history cleared");
        Ok(())
    }

    /// Ticks against the wall clock every `interval` until the session
    /// expires or `interrupted` is set. An interrupt stops the session, so the
    /// export still fires exactly once. Returns the elapsed time.
    ///
    /// `on_tick` runs after every tick that produced a batch.
    pub fn run_until<F>(
        &mut self,
        interrupted: &AtomicBool,
        interval: Duration,
        mut on_tick: F,
    ) -> Result<Duration>
    where
        F: FnMut(&Self, Duration),
    {
        let started = Instant::now();
        loop {
            let elapsed = started.elapsed();
            if interrupted.load(Ordering::SeqCst) {
                warn!(kind = %M::KIND, samples = self.history.len(), "interrupted");
                self.stop()?;
                return Ok(elapsed);
            }
            if self.tick(elapsed)? == Tick::Stop {
                return Ok(elapsed);
            }
            on_tick(self, elapsed);
            thread::sleep(interval);
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &TraceHistory<M::Input> {
        &self.history
    }

    /// Latest recovery estimate, `None` for channels without recovery.
    pub fn estimate(&self) -> Option<RecoveryEstimate> {
        self.estimate
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn status_line(&self, elapsed: Duration) -> String {
        let mut line = format!(
            "Time: {:.1}s | Traces: {}",
            elapsed.as_secs_f64(),
            self.history.len()
        );
        if let Some(estimate) = self.estimate {
            let status = if estimate.is_cracked() {
                "CRACKED!"
            } else {
                "WORKING..."
            };
            line.push_str(&format!(
                " | Status: {status} | Guess: {} ({:.1}%)",
                estimate.guess,
                estimate.confidence * 100.0
            ));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::cache::CacheLeakageModel;
    use crate::leakage::ModelKind;
    use crate::power::PowerLeakageModel;
    use crate::recover::KeyGuess;
    use crate::timing::TimingLeakageModel;

    fn config(kind: ModelKind) -> SessionConfig {
        SessionConfig::for_kind(kind, Duration::from_secs(10))
    }

    fn cache_session() -> SimulationSession<CacheLeakageModel> {
        SimulationSession::new(
            CacheLeakageModel::default(),
            NoiseModel::seeded(1),
            config(ModelKind::Cache),
        )
        .unwrap()
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let bad = SessionConfig {
            batch_size: 0,
            duration: Duration::from_secs(1),
            window: 100,
        };
        assert!(SimulationSession::new(PowerLeakageModel::default(), NoiseModel::seeded(0), bad)
            .is_err());
        assert!(SessionConfig::new(5, Duration::ZERO, 0).is_err());
    }

    #[test]
    fn tick_before_start_fails() {
        let mut session = cache_session();
        assert!(matches!(session.tick(Duration::ZERO), Err(Error::NotStarted)));
        assert!(session.history().is_empty());
    }

    #[test]
    fn start_twice_is_an_invalid_transition() {
        let mut session = cache_session();
        session.start().unwrap();
        assert!(matches!(
            session.start(),
            Err(Error::InvalidTransition {
                from: SessionState::Running,
                to: SessionState::Running
            })
        ));
    }

    #[test]
    fn each_tick_appends_one_batch() {
        let mut session = SimulationSession::new(
            PowerLeakageModel::default(),
            NoiseModel::seeded(2),
            config(ModelKind::Power),
        )
        .unwrap();
        session.start().unwrap();
        for i in 1..=4 {
            assert_eq!(session.tick(Duration::from_millis(50 * i)).unwrap(), Tick::Continue);
        }
        assert_eq!(session.history().len(), 20);
        assert!(session.estimate().is_none());
    }

    #[test]
    fn expiry_stops_and_exports_once() {
        let exported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&exported);
        let mut session = SimulationSession::new(
            TimingLeakageModel::default(),
            NoiseModel::seeded(3),
            SessionConfig::new(10, Duration::from_secs(1), 200).unwrap(),
        )
        .unwrap();
        session.on_export(move |history| {
            sink.lock().unwrap().push(history.len());
            Ok(())
        });
        session.start().unwrap();
        session.tick(Duration::from_millis(500)).unwrap();
        assert_eq!(session.tick(Duration::from_millis(1_500)).unwrap(), Tick::Stop);
        assert_eq!(session.state(), SessionState::Stopped);

        assert_eq!(session.tick(Duration::from_millis(1_600)).unwrap(), Tick::Stop);
        session.stop().unwrap();
        assert_eq!(session.history().len(), 10);
        assert_eq!(*exported.lock().unwrap(), vec![10]);
    }

    #[test]
    fn duration_boundary_still_ticks() {
        let mut session = cache_session();
        session.start().unwrap();
        assert_eq!(session.tick(Duration::from_secs(10)).unwrap(), Tick::Continue);
        assert_eq!(session.state(), SessionState::Running);
    }

    #[test]
    fn stop_from_idle_exports_empty_history() {
        let exported = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&exported);
        let mut session = cache_session();
        session.on_export(move |history| {
            *sink.lock().unwrap() = Some(history.len());
            Ok(())
        });
        session.stop().unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(*exported.lock().unwrap(), Some(0));
        assert!(session.start().is_err());
    }

    #[test]
    fn failing_export_still_stops() {
        let mut session = cache_session();
        session.on_export(|_| Err(Error::config("out", "unwritable")));
        session.start().unwrap();
        assert!(session.stop().is_err());
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.stop().is_ok());
    }

    #[test]
    fn cache_session_tracks_recovery() {
        let mut session = cache_session();
        assert_eq!(session.estimate(), Some(RecoveryEstimate::UNKNOWN));
        session.start().unwrap();
        for i in 0..100 {
            session.tick(Duration::from_millis(i * 50)).unwrap();
        }
        let estimate = session.estimate().unwrap();
        assert_eq!(estimate.guess, KeyGuess::Known(0x5A));
        assert!(session.status_line(Duration::from_secs(5)).contains("0x5a"));
    }

    #[test]
    fn rekey_clears_history() {
        let mut session = cache_session();
        session.start().unwrap();
        session.tick(Duration::ZERO).unwrap();
        session.rekey(0x11).unwrap();
        assert!(session.history().is_empty());
        assert_eq!(session.model().secret(), 0x11);
        assert_eq!(session.estimate(), Some(RecoveryEstimate::UNKNOWN));

        session.stop().unwrap();
        assert!(matches!(session.rekey(0x22), Err(Error::SessionStopped)));
    }

    #[test]
    fn interrupt_before_first_tick_exports_once() {
        let exported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&exported);
        let mut session = cache_session();
        session.on_export(move |history| {
            sink.lock().unwrap().push(history.len());
            Ok(())
        });
        session.start().unwrap();

        let interrupted = AtomicBool::new(true);
        let mut ticks = 0;
        session
            .run_until(&interrupted, Duration::ZERO, |_, _| ticks += 1)
            .unwrap();
        assert_eq!(ticks, 0);
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(*exported.lock().unwrap(), vec![0]);

        session.stop().unwrap();
        assert_eq!(exported.lock().unwrap().len(), 1);
    }

    #[test]
    fn interrupt_mid_run_keeps_collected_batches() {
        let exported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&exported);
        let mut session = SimulationSession::new(
            PowerLeakageModel::default(),
            NoiseModel::seeded(4),
            SessionConfig::new(5, Duration::from_secs(3_600), 100).unwrap(),
        )
        .unwrap();
        session.on_export(move |history| {
            sink.lock().unwrap().push(history.len());
            Ok(())
        });
        session.start().unwrap();

        let interrupted = AtomicBool::new(false);
        session
            .run_until(&interrupted, Duration::ZERO, |s, _| {
                if s.history().len() >= 15 {
                    interrupted.store(true, Ordering::SeqCst);
                }
            })
            .unwrap();
        assert_eq!(session.history().len(), 15);
        assert_eq!(*exported.lock().unwrap(), vec![15]);
    }

    #[test]
    fn run_until_stops_on_expiry() {
        let mut session = SimulationSession::new(
            TimingLeakageModel::default(),
            NoiseModel::seeded(6),
            SessionConfig::new(1, Duration::ZERO, 200).unwrap(),
        )
        .unwrap();
        session.start().unwrap();
        let elapsed = session
            .run_until(&AtomicBool::new(false), Duration::from_millis(1), |_, _| {})
            .unwrap();
        assert!(elapsed > Duration::ZERO);
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    fn status_line_without_recovery() {
        let session = SimulationSession::new(
            TimingLeakageModel::default(),
            NoiseModel::seeded(0),
            config(ModelKind::Timing),
        )
        .unwrap();
        assert_eq!(session.status_line(Duration::from_millis(1_300)), "Time: 1.3s | Traces: 0");
    }
}
