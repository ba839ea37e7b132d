use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array1, ArrayView1};
use ndarray_npy::{ReadNpyExt, ReadableElement, WritableElement, WriteNpyExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::leakage::LeakageModel;
use crate::trace::TraceHistory;

const HEAD: usize = 5;

pub fn read_array<T: ReadableElement>(path: impl AsRef<Path>) -> Result<Array1<T>> {
    let reader = File::open(path)?;
    Ok(Array1::<T>::read_npy(reader)?)
}

pub fn write_array<T: WritableElement>(path: impl AsRef<Path>, ar: ArrayView1<T>) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    ar.write_npy(writer)?;
    Ok(())
}

/// Writes a history as `.npy` columns under `dir`:
/// `<prefix>_measurements.npy`, `<prefix>_labels.npy` and, when every input
/// has a numeric form, `<prefix>_inputs.npy`.
#[derive(Debug, Clone)]
pub struct NpyExporter {
    dir: PathBuf,
    prefix: String,
}

impl NpyExporter {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    fn path(&self, column: &str) -> PathBuf {
        self.dir.join(format!("{}_{}.npy", self.prefix, column))
    }

    /// Returns the written paths, none for an empty history.
    pub fn export<M: LeakageModel>(&self, history: &TraceHistory<M::Input>) -> Result<Vec<PathBuf>> {
        if history.is_empty() {
            warn!(prefix = %self.prefix, "no traces collected, nothing saved");
            return Ok(Vec::new());
        }
        fs::create_dir_all(&self.dir)?;
        let mut written = Vec::with_capacity(3);

        let measurements = self.path("measurements");
        write_array(&measurements, history.measurement_view())?;
        written.push(measurements);

        let labels = self.path("labels");
        write_array(&labels, history.label_array().view())?;
        written.push(labels);

        if let Some(inputs) = history.input_array(M::encode_input) {
            let path = self.path("inputs");
            write_array(&path, inputs.view())?;
            written.push(path);
        }

        info!(samples = history.len(), dir = %self.dir.display(), "saved npy traces");
        Ok(written)
    }
}

#[derive(Debug, Serialize)]
struct Row {
    input: String,
    measurement: f64,
    label: u32,
}

/// Writes a history as `<dir>/<prefix>.csv` with `input,measurement,label` rows.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    dir: PathBuf,
    prefix: String,
}

impl CsvExporter {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    /// Returns the written path, `None` for an empty history.
    pub fn export<M: LeakageModel>(
        &self,
        history: &TraceHistory<M::Input>,
    ) -> Result<Option<PathBuf>> {
        if history.is_empty() {
            warn!(prefix = %self.prefix, "no traces collected, nothing saved");
            return Ok(None);
        }
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.csv", self.prefix));
        let mut writer = csv::Writer::from_path(&path)?;
        for (input, measurement, label) in history.iter() {
            writer.serialize(Row {
                input: M::describe_input(input),
                measurement,
                label,
            })?;
        }
        writer.flush()?;
        info!(samples = history.len(), path = %path.display(), "saved csv traces");
        Ok(Some(path))
    }
}

/// Header and first values of an exported file.
#[derive(Debug, Clone, PartialEq)]
pub struct Inspection {
    pub path: PathBuf,
    pub shape: Vec<u64>,
    pub dtype: String,
    pub head: Vec<String>,
}

impl fmt::Display for Inspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Inspecting: {}", self.path.display())?;
        writeln!(f, "   Shape: {:?}", self.shape)?;
        writeln!(f, "   Type:  {}", self.dtype)?;
        write!(f, "   First {} samples: [{}]", self.head.len(), self.head.join(", "))
    }
}

/// Reads the header and the first five values of a `.npy` file, or the row
/// count and first five measurements of a CSV export.
pub fn inspect(path: impl AsRef<Path>) -> Result<Inspection> {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => inspect_csv(path),
        _ => inspect_npy(path),
    }
}

fn inspect_npy(path: &Path) -> Result<Inspection> {
    let file = npyz::NpyFile::new(BufReader::new(File::open(path)?))?;
    let shape = file.shape().to_vec();
    let dtype = format!("{:?}", file.dtype());

    // the header does not say which Rust type fits, so try the ones the
    // exporters write before the common numpy defaults
    let head = npy_head::<f64>(path, |v| v.to_string())
        .or_else(|_| npy_head::<u32>(path, |v| v.to_string()))
        .or_else(|_| npy_head::<i64>(path, |v| v.to_string()))
        .or_else(|_| npy_head::<f32>(path, |v| v.to_string()))
        .or_else(|_| npy_head::<u8>(path, |v| v.to_string()))?;

    Ok(Inspection {
        path: path.to_path_buf(),
        shape,
        dtype,
        head,
    })
}

fn npy_head<T: npyz::Deserialize>(path: &Path, show: fn(T) -> String) -> io::Result<Vec<String>> {
    let file = npyz::NpyFile::new(BufReader::new(File::open(path)?))?;
    let values = file.into_vec::<T>()?;
    Ok(values.into_iter().take(HEAD).map(show).collect())
}

fn inspect_csv(path: &Path) -> Result<Inspection> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let column = headers.iter().position(|h| h == "measurement").unwrap_or(0);

    let mut rows = 0u64;
    let mut head = Vec::with_capacity(HEAD);
    for record in reader.records() {
        let record = record?;
        if head.len() < HEAD {
            let field = record.get(column).unwrap_or_default();
            let value: f64 = fast_float::parse(field).map_err(|_| Error::Parse {
                value: field.to_string(),
            })?;
            head.push(value.to_string());
        }
        rows += 1;
    }

    Ok(Inspection {
        path: path.to_path_buf(),
        shape: vec![rows, headers.len() as u64],
        dtype: "csv".to_string(),
        head,
    })
}

/// Creates a [`ProgressBar`] with a predefined default style.
pub fn progress_bar(len: usize) -> ProgressBar {
    let style = ProgressStyle::with_template("{elapsed_precise} {wide_bar} {pos}/{len} ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    let progress_bar = ProgressBar::new(len as u64).with_style(style);
    progress_bar.enable_steady_tick(Duration::from_millis(100));
    progress_bar
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheLeakageModel;
    use crate::leakage::Sample;
    use crate::timing::TimingLeakageModel;
    use ndarray::array;

    fn cache_history() -> TraceHistory<u8> {
        let mut history = TraceHistory::new(100);
        for (i, t) in [45.0, 180.0, 182.5, 44.0, 179.0, 181.0].into_iter().enumerate() {
            history.push(Sample {
                input: i as u8,
                measurement: t,
                label: i as u32 ^ 0x5A,
            });
        }
        history
    }

    #[test]
    fn array_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.npy");
        write_array(&path, array![1.5, 2.5, -3.0].view()).unwrap();
        let back: Array1<f64> = read_array(&path).unwrap();
        assert_eq!(back, array![1.5, 2.5, -3.0]);
    }

    #[test]
    fn npy_export_writes_numeric_columns() {
        let dir = tempfile::tempdir().unwrap();
        let history = cache_history();
        let written = NpyExporter::new(dir.path(), "cache")
            .export::<CacheLeakageModel>(&history)
            .unwrap();
        assert_eq!(written.len(), 3);

        let measurements: Array1<f64> = read_array(dir.path().join("cache_measurements.npy")).unwrap();
        let inputs: Array1<u32> = read_array(dir.path().join("cache_inputs.npy")).unwrap();
        let labels: Array1<u32> = read_array(dir.path().join("cache_labels.npy")).unwrap();
        assert_eq!(measurements.to_vec(), history.measurements());
        assert_eq!(inputs.len(), history.len());
        assert_eq!(labels.to_vec(), history.labels());
    }

    #[test]
    fn string_inputs_skip_the_input_column() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = TraceHistory::new(200);
        history.push(Sample {
            input: "adxyz".to_string(),
            measurement: 160.0,
            label: 2,
        });
        let written = NpyExporter::new(dir.path(), "timing")
            .export::<TimingLeakageModel>(&history)
            .unwrap();
        assert_eq!(written.len(), 2);
        assert!(!dir.path().join("timing_inputs.npy").exists());

        let csv = CsvExporter::new(dir.path(), "timing")
            .export::<TimingLeakageModel>(&history)
            .unwrap()
            .unwrap();
        let text = fs::read_to_string(csv).unwrap();
        assert_eq!(text, "input,measurement,label\nadxyz,160.0,2\n");
    }

    #[test]
    fn empty_history_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("data");
        let history = TraceHistory::<u8>::new(100);
        let written = NpyExporter::new(&out, "cache")
            .export::<CacheLeakageModel>(&history)
            .unwrap();
        assert!(written.is_empty());
        let csv = CsvExporter::new(&out, "cache")
            .export::<CacheLeakageModel>(&history)
            .unwrap();
        assert!(csv.is_none());
        assert!(!out.exists());
    }

    #[test]
    fn inspect_reports_shape_and_head() {
        let dir = tempfile::tempdir().unwrap();
        let history = cache_history();
        NpyExporter::new(dir.path(), "cache")
            .export::<CacheLeakageModel>(&history)
            .unwrap();

        let report = inspect(dir.path().join("cache_measurements.npy")).unwrap();
        assert_eq!(report.shape, vec![6]);
        assert_eq!(report.head, vec!["45", "180", "182.5", "44", "179"]);

        let labels = inspect(dir.path().join("cache_labels.npy")).unwrap();
        assert_eq!(labels.head.len(), 5);
        assert!(report.to_string().contains("Shape: [6]"));
    }

    #[test]
    fn inspect_csv_counts_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = CsvExporter::new(dir.path(), "cache")
            .export::<CacheLeakageModel>(&cache_history())
            .unwrap()
            .unwrap();
        let report = inspect(path).unwrap();
        assert_eq!(report.shape, vec![6, 3]);
        assert_eq!(report.head[2], "182.5");
    }

    #[test]
    fn inspect_missing_file_is_io_error() {
        assert!(matches!(inspect("/nonexistent/trace.npy"), Err(Error::Io(_))));
    }
}
