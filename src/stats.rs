use std::ops::Add;

use ndarray::{s, Array1, ArrayView1};

/// Descriptive statistics of a measurement trace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceSummary {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    /// Sum of all measurements (energy, for a power trace).
    pub total: f64,
}

impl TraceSummary {
    /// `None` for an empty trace.
    pub fn of(trace: ArrayView1<f64>) -> Option<Self> {
        let mean = trace.mean()?;
        let mut sorted = trace.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let median = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        };
        Some(Self {
            count: n,
            mean,
            std: trace.std(0.0),
            min: sorted[0],
            max: sorted[n - 1],
            median,
            total: trace.sum(),
        })
    }
}

/// Streaming Pearson correlation between two variables.
///
/// Keeps running sums only, so partial accumulators built on separate
/// threads can be merged with `+`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Correlation {
    sum_x: f64,
    sig_x: f64,
    sum_y: f64,
    sig_y: f64,
    cov: f64,
    len: usize,
}

impl Correlation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, x: f64, y: f64) {
        self.sum_x += x;
        self.sig_x += x * x;
        self.sum_y += y;
        self.sig_y += y * y;
        self.cov += x * y;
        self.len += 1;
    }

    pub fn extend<T: IntoIterator<Item = (f64, f64)>>(&mut self, pairs: T) {
        for (x, y) in pairs {
            self.update(x, y);
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pearson coefficient, `None` with fewer than two pairs or a constant variable.
    pub fn finalize(&self) -> Option<f64> {
        if self.len < 2 {
            return None;
        }
        let n = self.len as f64;
        let upper = self.cov / n - (self.sum_x / n) * (self.sum_y / n);
        let lower_1 = self.sig_x / n - (self.sum_x / n) * (self.sum_x / n);
        let lower_2 = self.sig_y / n - (self.sum_y / n) * (self.sum_y / n);
        let lower = (lower_1 * lower_2).sqrt();
        if !(lower > 0.0) {
            return None;
        }
        Some((upper / lower).clamp(-1.0, 1.0))
    }
}

impl Add for Correlation {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            sum_x: self.sum_x + rhs.sum_x,
            sig_x: self.sig_x + rhs.sig_x,
            sum_y: self.sum_y + rhs.sum_y,
            sig_y: self.sig_y + rhs.sig_y,
            cov: self.cov + rhs.cov,
            len: self.len + rhs.len,
        }
    }
}

/// Mean measurement per label class (the timing "staircase", or power per
/// Hamming weight).
#[derive(Debug, Clone, PartialEq)]
pub struct LabelProfile {
    sums: Array1<f64>,
    counts: Array1<usize>,
}

impl LabelProfile {
    pub fn new(classes: usize) -> Self {
        Self {
            sums: Array1::zeros(classes),
            counts: Array1::zeros(classes),
        }
    }

    pub fn classes(&self) -> usize {
        self.counts.len()
    }

    /// Labels outside `0..classes` are ignored.
    pub fn update(&mut self, label: u32, measurement: f64) {
        let class = label as usize;
        if class < self.classes() {
            self.sums[class] += measurement;
            self.counts[class] += 1;
        }
    }

    pub fn count(&self, label: u32) -> usize {
        self.counts.get(label as usize).copied().unwrap_or(0)
    }

    /// Mean per class, `None` for classes never observed.
    pub fn means(&self) -> Vec<Option<f64>> {
        self.sums
            .iter()
            .zip(self.counts.iter())
            .map(|(&sum, &count)| (count > 0).then(|| sum / count as f64))
            .collect()
    }

    pub fn from_columns(classes: usize, labels: &[u32], measurements: &[f64]) -> Self {
        let mut profile = Self::new(classes);
        for (&label, &m) in labels.iter().zip(measurements) {
            profile.update(label, m);
        }
        profile
    }
}

/// Profiles with different class counts merge into the wider one.
impl Add for LabelProfile {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        let (mut wide, narrow) = if self.classes() >= rhs.classes() {
            (self, rhs)
        } else {
            (rhs, self)
        };
        let n = narrow.classes();
        let mut sums = wide.sums.slice_mut(s![..n]);
        sums += &narrow.sums;
        let mut counts = wide.counts.slice_mut(s![..n]);
        counts += &narrow.counts;
        wide
    }
}

/// Split of a cache trace around the hit/miss threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitMissSplit {
    pub hits: usize,
    pub misses: usize,
    pub mean_hit: Option<f64>,
    pub mean_miss: Option<f64>,
}

impl HitMissSplit {
    pub fn of(measurements: &[f64], threshold: f64) -> Self {
        let (fast, slow): (Vec<f64>, Vec<f64>) =
            measurements.iter().copied().partition(|&t| t < threshold);
        let mean = |v: &[f64]| ArrayView1::from(v).mean();
        Self {
            hits: fast.len(),
            misses: slow.len(),
            mean_hit: mean(&fast),
            mean_miss: mean(&slow),
        }
    }
}
