use ndarray::{Array1, ArrayView1};

use crate::leakage::{Batch, Sample};

/// Append-only history of one session, stored column-wise.
///
/// The full history feeds the analysis; `window()` is the fixed-width suffix
/// shown by a live display.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceHistory<I> {
    inputs: Vec<I>,
    measurements: Vec<f64>,
    labels: Vec<u32>,
    window: usize,
}

/// Borrowed suffix of a [`TraceHistory`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceWindow<'a, I> {
    pub inputs: &'a [I],
    pub measurements: &'a [f64],
    pub labels: &'a [u32],
}

impl<'a, I> TraceWindow<'a, I> {
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
}

impl<I> TraceHistory<I> {
    pub fn new(window: usize) -> Self {
        Self {
            inputs: Vec::new(),
            measurements: Vec::new(),
            labels: Vec::new(),
            window,
        }
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    pub fn window_width(&self) -> usize {
        self.window
    }

    pub fn push(&mut self, sample: Sample<I>) {
        self.inputs.push(sample.input);
        self.measurements.push(sample.measurement);
        self.labels.push(sample.label);
    }

    pub fn append(&mut self, batch: Batch<I>) {
        let n = batch.len();
        self.inputs.reserve(n);
        self.measurements.reserve(n);
        self.labels.reserve(n);
        for sample in batch {
            self.push(sample);
        }
    }

    pub fn clear(&mut self) {
        self.inputs.clear();
        self.measurements.clear();
        self.labels.clear();
    }

    pub fn inputs(&self) -> &[I] {
        &self.inputs
    }

    pub fn measurements(&self) -> &[f64] {
        &self.measurements
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// The last `window_width()` samples, or everything if fewer.
    pub fn window(&self) -> TraceWindow<'_, I> {
        self.tail(self.window)
    }

    /// The last `k` samples, or everything if fewer.
    pub fn tail(&self, k: usize) -> TraceWindow<'_, I> {
        let start = self.len().saturating_sub(k);
        TraceWindow {
            inputs: &self.inputs[start..],
            measurements: &self.measurements[start..],
            labels: &self.labels[start..],
        }
    }

    pub fn measurement_view(&self) -> ArrayView1<'_, f64> {
        ArrayView1::from(self.measurements.as_slice())
    }

    pub fn label_array(&self) -> Array1<u32> {
        Array1::from(self.labels.clone())
    }

    /// Inputs as a numeric column, `None` as soon as one input has no
    /// numeric encoding.
    pub fn input_array(&self, encode: fn(&I) -> Option<u32>) -> Option<Array1<u32>> {
        self.inputs
            .iter()
            .map(encode)
            .collect::<Option<Vec<u32>>>()
            .map(Array1::from)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&I, f64, u32)> + '_ {
        self.inputs
            .iter()
            .zip(self.measurements.iter().copied())
            .zip(self.labels.iter().copied())
            .map(|((input, measurement), label)| (input, measurement, label))
    }
}
