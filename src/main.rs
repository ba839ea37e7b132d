use std::error;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use plotly::Plot;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use aegis::cache::{self, CacheLeakageModel};
use aegis::config::{Config, SessionConfig};
use aegis::dashboard::{render_cache, render_dashboard, render_power, render_timing, write_html};
use aegis::leakage::{LeakageModel, ModelKind};
use aegis::noise::NoiseModel;
use aegis::recover::success_rate;
use aegis::session::SimulationSession;
use aegis::stats::{Correlation, LabelProfile, TraceSummary};
use aegis::tools::{inspect, progress_bar, CsvExporter, NpyExporter};
use aegis::trace::TraceHistory;

/// Side-channel leakage simulators
#[derive(Parser, Debug)]
#[command(name = "aegis")]
#[command(about = "Simulate cache, power and timing side channels")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Flush+Reload cache attack with live key recovery
    Cache(RunArgs),
    /// Hamming weight / distance power trace
    Power(RunArgs),
    /// Early-exit password comparison timing
    Timing(RunArgs),
    /// Run all three channels and write the 2x2 dashboard
    Dashboard {
        /// Animation frames to simulate
        #[arg(long, default_value_t = 200)]
        frames: u32,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(long, default_value = "data/dashboard.html")]
        out: PathBuf,
    },
    /// Print shape, dtype and first samples of exported files
    Inspect {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Cache key recovery success rate against the number of traces
    SuccessRate {
        #[arg(long, default_value_t = 100)]
        trials: usize,

        #[arg(long, default_value_t = 5_000)]
        max_traces: usize,

        #[arg(long, default_value_t = 500)]
        step: usize,

        /// Jitter standard deviation in cycles
        #[arg(long, default_value_t = cache::NOISE_STD)]
        noise: f64,

        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Session length in seconds (overrides the config file)
    #[arg(long)]
    duration: Option<f64>,

    /// Milliseconds between ticks
    #[arg(long, default_value_t = 50)]
    interval: u64,

    /// Samples per tick (overrides the config file)
    #[arg(long)]
    batch: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory for traces and plots
    #[arg(long, default_value = "data")]
    out: PathBuf,

    /// Skip writing the trace files on stop
    #[arg(long)]
    no_export: bool,
}

impl RunArgs {
    fn load(&self) -> Result<Config, Box<dyn error::Error>> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)?,
            None => Config::default(),
        };
        if let Some(duration) = self.duration {
            config.session.duration_secs = duration;
        }
        if let Some(batch) = self.batch {
            config.session.batch_size = Some(batch);
        }
        config.validate()?;
        Ok(config)
    }
}

fn run_live<M, F>(
    model: M,
    config: SessionConfig,
    args: &RunArgs,
    interrupted: &AtomicBool,
    render: F,
) -> Result<(), Box<dyn error::Error>>
where
    M: LeakageModel + 'static,
    F: Fn(&TraceHistory<M::Input>) -> Plot,
{
    let kind = M::KIND;
    info!(%kind, secret = ?model.secret(), "starting live simulation");
    info!(duration_secs = config.duration.as_secs_f64(), "stops automatically");

    let mut session = SimulationSession::new(model, NoiseModel::from_seed_opt(args.seed), config)?;
    if !args.no_export {
        let prefix = format!("live_{kind}");
        let npy = NpyExporter::new(&args.out, prefix.clone());
        let csv = CsvExporter::new(&args.out, prefix);
        session.on_export(move |history| {
            npy.export::<M>(history)?;
            csv.export::<M>(history)?;
            Ok(())
        });
    }

    let total_ms = config.duration.as_millis() as usize;
    let bar = progress_bar(total_ms);
    let interval = Duration::from_millis(args.interval);
    let mut last_report = Duration::ZERO;

    session.start()?;
    let elapsed = session.run_until(interrupted, interval, |session, elapsed| {
        bar.set_position((elapsed.as_millis() as u64).min(total_ms as u64));
        if elapsed >= last_report + Duration::from_secs(1) {
            bar.println(session.status_line(elapsed));
            last_report = elapsed;
        }
    })?;
    bar.finish_and_clear();

    println!("{}", session.status_line(elapsed));
    report(session.history());
    let plot = render(session.history());
    write_html(&plot, args.out.join(format!("{kind}.html")))?;
    Ok(())
}

/// Replaces the default Ctrl-C exit with a flag the live loop polls, so an
/// interrupted run still saves its traces.
fn interrupt_flag() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;
    Ok(interrupted)
}

fn report<I>(history: &TraceHistory<I>) {
    let Some(summary) = TraceSummary::of(history.measurement_view()) else {
        println!("No traces collected");
        return;
    };
    println!(
        "{} traces: mean {:.2}, std {:.2}, min {:.2}, median {:.2}, max {:.2}, total {:.1}",
        summary.count, summary.mean, summary.std, summary.min, summary.median, summary.max, summary.total
    );

    let mut correlation = Correlation::new();
    correlation.extend(
        history
            .labels()
            .iter()
            .map(|&l| f64::from(l))
            .zip(history.measurements().iter().copied()),
    );
    if let Some(r) = correlation.finalize() {
        println!("label/measurement correlation: {r:.3}");
    }

    // cache labels span the whole byte, keep the table short
    let classes = history.labels().iter().max().map_or(0, |&l| l as usize + 1);
    if classes <= 33 {
        let profile = LabelProfile::from_columns(classes, history.labels(), history.measurements());
        for (label, mean) in profile.means().into_iter().enumerate() {
            if let Some(mean) = mean {
                println!("  label {label:>2}: {mean:>8.2} ({} samples)", profile.count(label as u32));
            }
        }
    }
}

/// Runs one session for a fixed number of 50 ms frames of simulated time.
fn run_frames<M: LeakageModel>(
    model: M,
    seed: Option<u64>,
    frames: u32,
) -> aegis::Result<TraceHistory<M::Input>> {
    const FRAME: Duration = Duration::from_millis(50);
    const BATCH: usize = 5;

    let duration = FRAME * frames;
    let config = SessionConfig::new(BATCH, duration, M::KIND.default_window())?;
    let mut session = SimulationSession::new(model, NoiseModel::from_seed_opt(seed), config)?;
    session.start()?;
    for frame in 0..frames {
        session.tick(FRAME * frame)?;
    }
    session.stop()?;
    Ok(session.history().clone())
}

fn dashboard(frames: u32, seed: Option<u64>, out: &Path) -> Result<(), Box<dyn error::Error>> {
    info!(frames, "launching 2x2 dashboard");
    let cache_model = CacheLeakageModel::default();
    let threshold = cache_model.threshold();
    let offset = |i: u64| seed.map(|s| s.wrapping_add(i));

    let (cache, (timing, power)) = rayon::join(
        || run_frames(cache_model, offset(0), frames),
        || {
            rayon::join(
                || run_frames(aegis::TimingLeakageModel::default(), offset(1), frames),
                || run_frames(aegis::PowerLeakageModel::default(), offset(2), frames),
            )
        },
    );
    let plot = render_dashboard(&cache?, threshold, &timing?, &power?);
    write_html(&plot, out)?;
    println!("Dashboard written to {}", out.display());
    Ok(())
}

fn success_rate_table(
    trials: usize,
    max_traces: usize,
    step: usize,
    noise: f64,
    seed: u64,
) -> Result<(), Box<dyn error::Error>> {
    let model = CacheLeakageModel::new(
        cache::HIT_LATENCY,
        cache::MISS_LATENCY,
        noise,
        cache::MONITORED_INDEX,
        cache::SECRET,
    )?;
    let counts: Vec<usize> = (step.max(1)..=max_traces).step_by(step.max(1)).collect();
    let bar = progress_bar(counts.len());
    let mut points = Vec::with_capacity(counts.len());
    for &count in &counts {
        points.extend(success_rate(&model, &[count], trials, seed));
        bar.inc(1);
    }
    bar.finish_and_clear();

    println!("{:>8} {:>10} {:>12}", "traces", "success", "confidence");
    for point in points {
        println!(
            "{:>8} {:>9.1}% {:>11.1}%",
            point.traces,
            point.success_rate * 100.0,
            point.mean_confidence * 100.0
        );
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Cache(args) => {
            let config = args.load()?;
            let interrupted = interrupt_flag()?;
            let model = config.cache.build()?;
            let threshold = model.threshold();
            let session = config.session_for(ModelKind::Cache)?;
            run_live(model, session, &args, &interrupted, |history| {
                render_cache(history, threshold, "Flush+Reload cache attack")
            })
        }
        Command::Power(args) => {
            let config = args.load()?;
            let interrupted = interrupt_flag()?;
            let model = config.power.build()?;
            let session = config.session_for(ModelKind::Power)?;
            run_live(model, session, &args, &interrupted, |history| {
                render_power(history, "Live power trace (side-channel leakage)")
            })
        }
        Command::Timing(args) => {
            let config = args.load()?;
            let interrupted = interrupt_flag()?;
            let title = format!("Live timing leakage: target '{}'", config.timing.secret);
            let model = config.timing.build()?;
            let session = config.session_for(ModelKind::Timing)?;
            run_live(model, session, &args, &interrupted, |history| {
                render_timing(history, &title)
            })
        }
        Command::Dashboard { frames, seed, out } => dashboard(frames, seed, &out),
        Command::Inspect { files } => {
            for file in files {
                match inspect(&file) {
                    Ok(report) => println!("{report}\n"),
                    Err(e) => error!(path = %file.display(), "failed to load: {e}"),
                }
            }
            Ok(())
        }
        Command::SuccessRate {
            trials,
            max_traces,
            step,
            noise,
            seed,
        } => success_rate_table(trials, max_traces, step, noise, seed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_beyond_u32_are_rejected() {
        assert!(Cli::try_parse_from(["aegis", "dashboard", "--frames", "4294967296"]).is_err());
        let cli = Cli::try_parse_from(["aegis", "dashboard", "--frames", "4294967295"]).unwrap();
        assert!(matches!(cli.command, Command::Dashboard { frames: u32::MAX, .. }));
    }

    #[test]
    fn frames_set_the_simulated_duration() {
        let history = run_frames(aegis::PowerLeakageModel::default(), Some(1), 8).unwrap();
        assert_eq!(history.len(), 40);
    }
}
