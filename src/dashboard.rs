//! Static HTML plots of the live traces.

use std::fs;
use std::path::Path;

use plotly::common::{DashType, Line, Marker, Mode, Title};
use plotly::layout::{Axis, GridPattern, LayoutGrid};
use plotly::{Histogram, Layout, Plot, Scatter};
use tracing::info;

use crate::error::Result;
use crate::stats::HitMissSplit;
use crate::trace::TraceHistory;

/// Points kept in the power correlation and timing scatter views.
pub const SCATTER_POINTS: usize = 200;

const CACHE_COLOR: &str = "#3498db";
const POWER_COLOR: &str = "#e74c3c";
const TIMING_COLOR: &str = "#2ecc71";
const HISTOGRAM_BINS: usize = 50;

fn axis(title: &str) -> Axis {
    Axis::new().title(Title::new(title))
}

fn indices(n: usize) -> Vec<usize> {
    (0..n).collect()
}

fn cache_line(history: &TraceHistory<u8>) -> Box<Scatter<usize, f64>> {
    let window = history.window();
    Scatter::new(indices(window.len()), window.measurements.to_vec())
        .mode(Mode::Lines)
        .name("reload time")
        .line(Line::new().color(CACHE_COLOR).width(1.5))
}

fn threshold_line(history: &TraceHistory<u8>, threshold: f64) -> Box<Scatter<usize, f64>> {
    let split = HitMissSplit::of(history.measurements(), threshold);
    let width = history.window_width().max(1);
    Scatter::new(vec![0, width], vec![threshold, threshold])
        .mode(Mode::Lines)
        .name(&format!(
            "threshold ({} hits, {} misses)",
            split.hits, split.misses
        ))
        .line(Line::new().color("red").dash(DashType::Dash))
}

fn power_line(history: &TraceHistory<u32>) -> Box<Scatter<usize, f64>> {
    let window = history.window();
    Scatter::new(indices(window.len()), window.measurements.to_vec())
        .mode(Mode::Lines)
        .name("power")
        .line(Line::new().color(POWER_COLOR).width(1.5))
}

fn power_scatter(history: &TraceHistory<u32>) -> Box<Scatter<u32, f64>> {
    let tail = history.tail(SCATTER_POINTS);
    Scatter::new(tail.labels.to_vec(), tail.measurements.to_vec())
        .mode(Mode::Markers)
        .name("power vs weight")
        .marker(Marker::new().color(POWER_COLOR).size(6).opacity(0.6))
}

fn timing_scatter(history: &TraceHistory<String>) -> Box<Scatter<u32, f64>> {
    let tail = history.tail(SCATTER_POINTS);
    Scatter::new(tail.labels.to_vec(), tail.measurements.to_vec())
        .mode(Mode::Markers)
        .name("execution time")
        .marker(Marker::new().color(TIMING_COLOR).size(6).opacity(0.7))
}

fn grid(rows: usize, columns: usize) -> LayoutGrid {
    LayoutGrid::new()
        .rows(rows)
        .columns(columns)
        .pattern(GridPattern::Independent)
}

/// Reload trace over the display window next to the cumulative histogram.
pub fn render_cache(history: &TraceHistory<u8>, threshold: f64, title: &str) -> Plot {
    let mut plot = Plot::new();
    plot.add_trace(cache_line(history));
    plot.add_trace(threshold_line(history, threshold));
    plot.add_trace(
        Histogram::new(history.measurements().to_vec())
            .name("cumulative distribution")
            .n_bins_x(HISTOGRAM_BINS)
            .x_axis("x2")
            .y_axis("y2"),
    );
    plot.set_layout(
        Layout::new()
            .title(Title::new(title))
            .grid(grid(1, 2))
            .x_axis(axis("Trace index"))
            .y_axis(axis("CPU cycles"))
            .x_axis2(axis("CPU cycles"))
            .y_axis2(axis("Count")),
    );
    plot
}

/// Live power trace next to Hamming weight vs. power.
pub fn render_power(history: &TraceHistory<u32>, title: &str) -> Plot {
    let mut plot = Plot::new();
    plot.add_trace(power_line(history));
    plot.add_trace(power_scatter(history).x_axis("x2").y_axis("y2"));
    plot.set_layout(
        Layout::new()
            .title(Title::new(title))
            .grid(grid(1, 2))
            .x_axis(axis("Sample"))
            .y_axis(axis("Power (arbitrary units)"))
            .x_axis2(axis("Hamming weight (bits)"))
            .y_axis2(axis("Measured power")),
    );
    plot
}

/// Execution time against the number of correct leading characters.
pub fn render_timing(history: &TraceHistory<String>, title: &str) -> Plot {
    let mut plot = Plot::new();
    plot.add_trace(timing_scatter(history));
    plot.set_layout(
        Layout::new()
            .title(Title::new(title))
            .x_axis(axis("Correct characters (prefix)"))
            .y_axis(axis("Time (ms)")),
    );
    plot
}

/// The 2x2 overview: cache trace, timing scatter, power trace and power
/// correlation.
pub fn render_dashboard(
    cache: &TraceHistory<u8>,
    threshold: f64,
    timing: &TraceHistory<String>,
    power: &TraceHistory<u32>,
) -> Plot {
    let mut plot = Plot::new();
    plot.add_trace(cache_line(cache));
    plot.add_trace(threshold_line(cache, threshold));
    plot.add_trace(timing_scatter(timing).x_axis("x2").y_axis("y2"));
    plot.add_trace(power_line(power).x_axis("x3").y_axis("y3"));
    plot.add_trace(power_scatter(power).x_axis("x4").y_axis("y4"));
    plot.set_layout(
        Layout::new()
            .title(Title::new("AEGIS: Integrated Side-Channel Analysis Platform"))
            .grid(grid(2, 2))
            .height(900)
            .x_axis(axis("1. CACHE: Flush+Reload trace"))
            .y_axis(axis("CPU cycles"))
            .x_axis2(axis("2. TIMING: correct characters (prefix)"))
            .y_axis2(axis("Time (ms)"))
            .x_axis3(axis("3. POWER: live consumption trace"))
            .y_axis3(axis("Power (arbitrary units)"))
            .x_axis4(axis("4. POWER: Hamming weight (bits)"))
            .y_axis4(axis("Measured power")),
    );
    plot
}

pub fn write_html(plot: &Plot, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, plot.to_html())?;
    info!(path = %path.display(), "wrote plot");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheLeakageModel;
    use crate::leakage::LeakageModel;
    use crate::noise::NoiseModel;
    use crate::power::PowerLeakageModel;
    use crate::timing::TimingLeakageModel;

    fn histories() -> (TraceHistory<u8>, TraceHistory<String>, TraceHistory<u32>) {
        let mut noise = NoiseModel::seeded(8);
        let mut cache = TraceHistory::new(100);
        cache.append(CacheLeakageModel::default().generate_batch(300, &mut noise));
        let mut timing = TraceHistory::new(200);
        timing.append(TimingLeakageModel::default().generate_batch(300, &mut noise));
        let mut power = TraceHistory::new(100);
        power.append(PowerLeakageModel::default().generate_batch(300, &mut noise));
        (cache, timing, power)
    }

    #[test]
    fn dashboard_html_names_every_panel() {
        let (cache, timing, power) = histories();
        let html = render_dashboard(&cache, 100.0, &timing, &power).to_html();
        assert!(html.contains("Flush+Reload"));
        assert!(html.contains("Hamming weight"));
        assert!(html.contains("AEGIS"));
    }

    #[test]
    fn write_html_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _, _) = histories();
        let path = dir.path().join("plots").join("cache.html");
        write_html(&render_cache(&cache, 100.0, "cache"), &path).unwrap();
        let html = fs::read_to_string(path).unwrap();
        assert!(html.contains("cumulative distribution"));
    }

    #[test]
    fn empty_histories_still_render() {
        let html = render_power(&TraceHistory::new(100), "power").to_html();
        assert!(html.contains("power"));
        let html = render_timing(&TraceHistory::new(200), "timing").to_html();
        assert!(html.contains("Correct characters"));
    }
}
