//! Result collection
//!
//! The aggregator is the single consumer of worker results. It walks the
//! planned batches in order and blocks on the result channel until every
//! point of the current batch is known, then emits a plot frame. Results
//! that arrive early for later batches are kept until their batch comes up.

use crate::core::{BestParam, EvalResult, GridError, GridPoint, Result};
use crate::plot::{Plotter, Terminal};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;

/// Callback invoked for every new result
pub type ProgressFn = Box<dyn FnMut(&EvalResult, &BestParam)>;

/// Append-only `c g rate` log, flushed after every line
pub struct ResultsLog {
    out: Box<dyn Write + Send>,
}

impl ResultsLog {
    /// Log into an arbitrary writer
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self { out: Box::new(out) }
    }

    /// Truncate or create the log file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path).map_err(GridError::IoError)?;
        Ok(Self::new(BufWriter::new(file)))
    }

    /// Continue an existing log file
    pub fn append<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(GridError::IoError)?;
        Ok(Self::new(BufWriter::new(file)))
    }

    /// Write one result line and flush it
    pub fn record(&mut self, point: GridPoint, rate: f64) -> Result<()> {
        writeln!(self.out, "{} {} {}", point.c, point.g, rate)?;
        self.out.flush()?;
        Ok(())
    }
}

/// Single-threaded consumer of the result channel
pub struct ResultAggregator {
    completed: HashMap<GridPoint, f64>,
    db: Vec<(GridPoint, f64)>,
    best: BestParam,
    history: Vec<EvalResult>,
    log: ResultsLog,
    plotter: Option<Plotter>,
    png: Option<PathBuf>,
    progress: Option<ProgressFn>,
}

impl ResultAggregator {
    pub fn new(log: ResultsLog) -> Self {
        Self {
            completed: HashMap::new(),
            db: Vec::new(),
            best: BestParam::new(),
            history: Vec::new(),
            log,
            plotter: None,
            png: None,
            progress: None,
        }
    }

    /// Draw a frame after every batch, also into `png` if given
    pub fn with_plotter(mut self, plotter: Plotter, png: Option<PathBuf>) -> Self {
        self.plotter = Some(plotter);
        self.png = png;
        self
    }

    /// Report every new result to `progress`
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Preload results from an earlier run; they are not logged again
    pub fn seed<I: IntoIterator<Item = EvalResult>>(&mut self, results: I) {
        for result in results {
            if self.completed.contains_key(&result.point) {
                continue;
            }
            self.completed.insert(result.point, result.rate);
            self.best.consider(result.point, result.rate);
            self.history.push(result);
        }
    }

    /// Whether `point` already has a rate
    pub fn is_done(&self, point: &GridPoint) -> bool {
        self.completed.contains_key(point)
    }

    /// Consume results until every batch is resolved.
    ///
    /// Fails with [`GridError::PoolExhausted`] if the channel disconnects
    /// (all workers gone) while points are still missing.
    pub fn run(
        &mut self,
        batches: &[Vec<GridPoint>],
        results: &Receiver<EvalResult>,
    ) -> Result<()> {
        for batch in batches {
            for point in batch {
                while !self.completed.contains_key(point) {
                    match results.recv() {
                        Ok(result) => self.record(result)?,
                        Err(_) => {
                            return Err(GridError::PoolExhausted {
                                unresolved: self.unresolved(batches),
                            })
                        }
                    }
                }
                let rate = self.completed[point];
                self.db.push((*point, rate));
            }
            self.redraw();
        }
        Ok(())
    }

    fn record(&mut self, result: EvalResult) -> Result<()> {
        if self.completed.contains_key(&result.point) {
            debug!("ignoring duplicate result for {}", result.point);
            return Ok(());
        }

        self.completed.insert(result.point, result.rate);
        self.log.record(result.point, result.rate)?;
        self.best.consider(result.point, result.rate);

        info!(
            "[{}] {} {} (best c={}, g={}, rate={})",
            result.worker,
            result.point,
            result.rate,
            self.best.point.map_or(f64::NAN, |p| p.cost()),
            self.best.point.map_or(f64::NAN, |p| p.gamma()),
            self.best.rate
        );
        if let Some(progress) = self.progress.as_mut() {
            progress(&result, &self.best);
        }

        self.history.push(result);
        Ok(())
    }

    fn redraw(&mut self) {
        let Some(plotter) = self.plotter.as_mut() else {
            return;
        };

        let mut outcome = plotter.redraw(&self.db, &self.best, &Terminal::Interactive);
        if outcome.is_ok() {
            if let Some(png) = &self.png {
                outcome = plotter.redraw(&self.db, &self.best, &Terminal::Png(png.clone()));
            }
        }

        if let Err(e) = outcome {
            warn!("plotting disabled: {e}");
            self.plotter = None;
        }
    }

    fn unresolved(&self, batches: &[Vec<GridPoint>]) -> usize {
        batches
            .iter()
            .flatten()
            .filter(|p| !self.completed.contains_key(p))
            .count()
    }

    /// Best point so far
    pub fn best(&self) -> &BestParam {
        &self.best
    }

    /// Every result in completion order, seeded ones first
    pub fn results(&self) -> &[EvalResult] {
        &self.history
    }

    /// Points plotted so far, in batch order
    pub fn plotted(&self) -> &[(GridPoint, f64)] {
        &self.db
    }

    /// Whether a plotter is still attached
    pub fn is_plotting(&self) -> bool {
        self.plotter.is_some()
    }
}
