//! Core type definitions for the grid search

use crate::core::{GridError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// A point of the (log2 C, log2 gamma) grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    /// Exponent of the cost parameter, C = 2^c
    pub c: f64,
    /// Exponent of the kernel width, gamma = 2^g
    pub g: f64,
}

impl GridPoint {
    /// Create a new grid point from its two exponents
    pub fn new(c: f64, g: f64) -> Self {
        Self { c, g }
    }

    /// The cost parameter C
    pub fn cost(&self) -> f64 {
        2f64.powf(self.c)
    }

    /// The kernel parameter gamma
    pub fn gamma(&self) -> f64 {
        2f64.powf(self.g)
    }

    // -0.0 and 0.0 are the same grid point
    fn key(&self) -> (u64, u64) {
        ((self.c + 0.0).to_bits(), (self.g + 0.0).to_bits())
    }
}

// Producer and consumer derive points from the same arithmetic sequence, so
// equal points are bitwise equal.
impl Eq for GridPoint {}

impl Hash for GridPoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for GridPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.c, self.g)
    }
}

/// Outcome of one successful evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    /// Name of the worker that produced the result
    pub worker: String,
    /// The evaluated grid point
    pub point: GridPoint,
    /// Cross-validation rate reported by the trainer
    pub rate: f64,
}

impl EvalResult {
    pub fn new(worker: impl Into<String>, point: GridPoint, rate: f64) -> Self {
        Self {
            worker: worker.into(),
            point,
            rate,
        }
    }
}

/// Best grid point seen so far
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestParam {
    /// `None` until the first result has been considered
    pub point: Option<GridPoint>,
    /// Best rate, `-inf` before any result
    pub rate: f64,
}

impl Default for BestParam {
    fn default() -> Self {
        Self::new()
    }
}

impl BestParam {
    /// Start with no best point
    pub fn new() -> Self {
        Self {
            point: None,
            rate: f64::NEG_INFINITY,
        }
    }

    /// Offer a result; returns true if it became the new best.
    ///
    /// A higher rate always wins. On an exact tie the incoming point only
    /// wins if it has the same gamma exponent as the current best and a
    /// smaller C exponent. Ties across different gammas keep whichever point
    /// arrived first, so the outcome depends on arrival order.
    pub fn consider(&mut self, point: GridPoint, rate: f64) -> bool {
        let wins = rate > self.rate
            || (rate == self.rate
                && self
                    .point
                    .is_some_and(|best| point.g == best.g && point.c < best.c));

        if wins {
            self.point = Some(point);
            self.rate = rate;
        }
        wins
    }

    /// Whether any result has been recorded
    pub fn is_set(&self) -> bool {
        self.point.is_some()
    }
}

impl fmt::Display for BestParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.point {
            Some(p) => write!(f, "{} {} {}", p.cost(), p.gamma(), self.rate),
            None => write!(f, "none"),
        }
    }
}

/// An inclusive `begin,end,step` exponent range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeSpec {
    pub begin: f64,
    pub end: f64,
    pub step: f64,
}

impl RangeSpec {
    pub fn new(begin: f64, end: f64, step: f64) -> Self {
        Self { begin, end, step }
    }

    /// Expand the range into its exponent sequence
    pub fn values(&self) -> Result<Vec<f64>> {
        crate::grid::range_f(self.begin, self.end, self.step)
    }
}

impl FromStr for RangeSpec {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(GridError::ParseError(format!(
                "expected begin,end,step but got {s:?}"
            )));
        }

        let mut values = [0.0; 3];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part
                .parse::<f64>()
                .map_err(|_| GridError::ParseError(format!("invalid number {part:?} in {s:?}")))?;
        }

        Ok(Self::new(values[0], values[1], values[2]))
    }
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.begin, self.end, self.step)
    }
}

/// Everything a search needs, fixed before any worker starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Range of log2(C)
    pub c_range: RangeSpec,
    /// Range of log2(gamma)
    pub g_range: RangeSpec,
    /// Number of cross-validation folds
    pub fold: u32,
    /// Path of the trainer executable
    pub trainer: PathBuf,
    /// Path of gnuplot, `None` disables plotting
    pub gnuplot: Option<PathBuf>,
    /// Dataset handed to the trainer
    pub dataset: PathBuf,
    /// Results log
    pub out_file: PathBuf,
    /// Contour image written after every batch
    pub png_file: PathBuf,
    /// Extra trainer arguments, forwarded verbatim
    pub pass_through: Vec<String>,
    /// Number of local subprocess workers
    pub local_workers: usize,
    /// One SSH worker per host
    pub ssh_hosts: Vec<String>,
    /// One telnet worker per host
    pub telnet_hosts: Vec<String>,
    /// Directory remote workers change into before running the trainer
    pub work_dir: PathBuf,
    /// Optional deadline for a single trainer invocation
    pub timeout: Option<Duration>,
}

impl SearchConfig {
    /// Default configuration for a dataset.
    ///
    /// Output files are named after the dataset file (`<name>.out`,
    /// `<name>.png`) in the current directory.
    pub fn new<P: AsRef<Path>>(dataset: P) -> Self {
        let dataset = dataset.as_ref().to_path_buf();
        let title = dataset_title(&dataset);

        Self {
            c_range: RangeSpec::new(-5.0, 15.0, 2.0),
            g_range: RangeSpec::new(3.0, -15.0, -2.0),
            fold: 5,
            trainer: default_trainer(),
            gnuplot: Some(default_gnuplot()),
            out_file: PathBuf::from(format!("{title}.out")),
            png_file: PathBuf::from(format!("{title}.png")),
            dataset,
            pass_through: Vec::new(),
            local_workers: 1,
            ssh_hosts: Vec::new(),
            telnet_hosts: Vec::new(),
            work_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            timeout: None,
        }
    }

    /// File name of the dataset, used as plot title
    pub fn dataset_title(&self) -> String {
        dataset_title(&self.dataset)
    }

    /// Total number of workers the pool will run
    pub fn worker_count(&self) -> usize {
        self.local_workers + self.ssh_hosts.len() + self.telnet_hosts.len()
    }

    /// Reject configurations that cannot produce a search
    pub fn validate(&self) -> Result<()> {
        for (name, range) in [("log2c", &self.c_range), ("log2g", &self.g_range)] {
            if range.step == 0.0 {
                return Err(GridError::Configuration(format!(
                    "{name} step must not be zero"
                )));
            }
            if range.values()?.is_empty() {
                return Err(GridError::Configuration(format!(
                    "{name} range {range} contains no values"
                )));
            }
        }

        if self.fold < 2 {
            return Err(GridError::Configuration(format!(
                "fold must be at least 2, got {}",
                self.fold
            )));
        }

        if self.worker_count() == 0 {
            return Err(GridError::Configuration(
                "at least one worker is required".to_string(),
            ));
        }

        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(GridError::Configuration(
                "timeout must be greater than zero".to_string(),
            ));
        }

        if !self.trainer.exists() {
            return Err(GridError::Configuration(format!(
                "trainer executable not found: {}",
                self.trainer.display()
            )));
        }

        if let Some(gnuplot) = &self.gnuplot {
            if !gnuplot.exists() {
                return Err(GridError::Configuration(format!(
                    "gnuplot executable not found: {}",
                    gnuplot.display()
                )));
            }
        }

        if !self.dataset.exists() {
            return Err(GridError::Configuration(format!(
                "dataset not found: {}",
                self.dataset.display()
            )));
        }

        Ok(())
    }
}

fn dataset_title(dataset: &Path) -> String {
    dataset
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(not(windows))]
fn default_trainer() -> PathBuf {
    PathBuf::from("../svm-train")
}

#[cfg(windows)]
fn default_trainer() -> PathBuf {
    PathBuf::from(r"..\windows\svm-train.exe")
}

#[cfg(not(windows))]
fn default_gnuplot() -> PathBuf {
    PathBuf::from("/usr/bin/gnuplot")
}

#[cfg(windows)]
fn default_gnuplot() -> PathBuf {
    PathBuf::from(r"c:\tmp\gnuplot\binary\pgnuplot.exe")
}
