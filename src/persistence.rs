//! Search persistence
//!
//! Reads back a results log so an interrupted search can resume, and saves
//! a JSON summary of a finished search for later inspection.

use crate::core::{BestParam, EvalResult, GridError, GridPoint, Result, SearchConfig};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::Path;

/// Worker name attached to results read back from a log
pub const RESUMED_WORKER: &str = "resume";

/// Load `c g rate` lines written by an earlier run
pub fn load_results_log<P: AsRef<Path>>(path: P) -> Result<Vec<EvalResult>> {
    let file = File::open(path).map_err(GridError::IoError)?;
    read_results_log(BufReader::new(file))
}

/// Parse a results log from any reader
pub fn read_results_log<R: BufRead>(reader: R) -> Result<Vec<EvalResult>> {
    let mut results = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(GridError::IoError)?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(GridError::ParseError(format!(
                "line {}: expected `c g rate`, got {line:?}",
                line_num + 1
            )));
        }

        let mut values = [0.0; 3];
        for (slot, field) in values.iter_mut().zip(&fields) {
            *slot = field.parse::<f64>().map_err(|_| {
                GridError::ParseError(format!("line {}: invalid number {field:?}", line_num + 1))
            })?;
        }

        results.push(EvalResult::new(
            RESUMED_WORKER,
            GridPoint::new(values[0], values[1]),
            values[2],
        ));
    }

    Ok(results)
}

/// Best point in a saved summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestEntry {
    pub log2c: f64,
    pub log2g: f64,
    pub c: f64,
    pub gamma: f64,
    pub rate: f64,
}

impl BestEntry {
    pub fn from_best(best: &BestParam) -> Option<Self> {
        best.point.map(|p| Self {
            log2c: p.c,
            log2g: p.g,
            c: p.cost(),
            gamma: p.gamma(),
            rate: best.rate,
        })
    }
}

/// Metadata for tracking where a summary came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryMetadata {
    /// Library version used to run the search
    pub library_version: String,
    /// Number of workers started
    pub workers: usize,
    /// Workers that retired after a failure
    pub retired_workers: usize,
    /// Number of planned batches
    pub batches: usize,
    /// Creation timestamp
    pub created_at: String,
}

/// Serializable record of a finished search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSummary {
    pub config: SearchConfig,
    pub best: Option<BestEntry>,
    /// Results in completion order
    pub results: Vec<EvalResult>,
    pub metadata: SummaryMetadata,
}

impl SearchSummary {
    pub fn new(
        config: &SearchConfig,
        best: &BestParam,
        results: &[EvalResult],
        batches: usize,
        retired_workers: usize,
    ) -> Self {
        Self {
            config: config.clone(),
            best: BestEntry::from_best(best),
            results: results.to_vec(),
            metadata: SummaryMetadata {
                library_version: crate::VERSION.to_string(),
                workers: config.worker_count(),
                retired_workers,
                batches,
                created_at: chrono::Utc::now().to_rfc3339(),
            },
        }
    }

    /// Save summary to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path).map_err(GridError::IoError)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)
            .map_err(|e| GridError::SerializationError(e.to_string()))?;
        Ok(())
    }

    /// Load summary from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path).map_err(GridError::IoError)?;
        let reader = BufReader::new(file);
        let summary = serde_json::from_reader(reader)
            .map_err(|e| GridError::SerializationError(e.to_string()))?;
        Ok(summary)
    }

    /// Print summary
    pub fn print_summary(&self) {
        println!("=== Grid Search Summary ===");
        println!("Dataset: {}", self.config.dataset.display());
        println!("log2(C) range: {}", self.config.c_range);
        println!("log2(gamma) range: {}", self.config.g_range);
        println!("Fold: {}", self.config.fold);
        println!("Points evaluated: {}", self.results.len());
        println!(
            "Workers: {} ({} retired)",
            self.metadata.workers, self.metadata.retired_workers
        );
        match &self.best {
            Some(best) => println!(
                "Best: C = {}  gamma = {}  rate = {}",
                best.c, best.gamma, best.rate
            ),
            None => println!("Best: none"),
        }
        println!("Created: {}", self.metadata.created_at);
    }
}
