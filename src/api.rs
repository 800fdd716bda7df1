//! High-level grid search API
//!
//! Wires the planner, job queue, worker pool, aggregator and plotter
//! together behind a builder.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use svmgrid::api::GridSearch;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let outcome = GridSearch::new("heart_scale")
//!     .with_trainer("../svm-train")
//!     .with_c_range(-5.0, 15.0, 2.0)
//!     .with_g_range(3.0, -15.0, -2.0)
//!     .with_local_workers(4)
//!     .without_plot()
//!     .run()?;
//!
//! println!("{}", outcome.best);
//! # Ok(())
//! # }
//! ```

use crate::aggregator::{ProgressFn, ResultAggregator, ResultsLog};
use crate::core::{
    BestParam, EvalResult, Executor, GridError, RangeSpec, Result, SearchConfig,
};
use crate::executor::{Credentials, LocalExecutor, SshExecutor, TelnetExecutor, TrainerCommand};
use crate::grid::GridPlan;
use crate::persistence::{load_results_log, SearchSummary};
use crate::plot::{PlotSettings, Plotter};
use crate::pool::{WorkerExit, WorkerPool};
use crate::queue::JobQueue;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// What a finished search reports
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Best point under the tie-break rule of [`BestParam::consider`]
    pub best: BestParam,
    /// All results in completion order, resumed ones first
    pub results: Vec<EvalResult>,
    /// Number of planned batches
    pub batches: usize,
    /// Workers that retired after a failure
    pub retired_workers: usize,
}

/// Grid search with builder-style configuration
pub struct GridSearch {
    config: SearchConfig,
    credentials: Option<Credentials>,
    resume: Option<PathBuf>,
    summary: Option<PathBuf>,
    progress: Option<ProgressFn>,
}

impl GridSearch {
    /// Search over `dataset` with the default ranges
    pub fn new<P: AsRef<Path>>(dataset: P) -> Self {
        Self::from_config(SearchConfig::new(dataset))
    }

    /// Search with a prepared configuration
    pub fn from_config(config: SearchConfig) -> Self {
        Self {
            config,
            credentials: None,
            resume: None,
            summary: None,
            progress: None,
        }
    }

    /// Set the log2(C) range
    pub fn with_c_range(mut self, begin: f64, end: f64, step: f64) -> Self {
        self.config.c_range = RangeSpec::new(begin, end, step);
        self
    }

    /// Set the log2(gamma) range
    pub fn with_g_range(mut self, begin: f64, end: f64, step: f64) -> Self {
        self.config.g_range = RangeSpec::new(begin, end, step);
        self
    }

    /// Set the number of cross-validation folds
    pub fn with_fold(mut self, fold: u32) -> Self {
        self.config.fold = fold;
        self
    }

    /// Set the trainer executable
    pub fn with_trainer(mut self, trainer: impl Into<PathBuf>) -> Self {
        self.config.trainer = trainer.into();
        self
    }

    /// Set the gnuplot executable
    pub fn with_gnuplot(mut self, gnuplot: impl Into<PathBuf>) -> Self {
        self.config.gnuplot = Some(gnuplot.into());
        self
    }

    /// Do not plot at all
    pub fn without_plot(mut self) -> Self {
        self.config.gnuplot = None;
        self
    }

    /// Set the results log path
    pub fn with_out_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.out_file = path.into();
        self
    }

    /// Set the contour image path
    pub fn with_png_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.png_file = path.into();
        self
    }

    /// Extra trainer arguments, forwarded verbatim
    pub fn with_pass_through<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.pass_through = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the number of local workers
    pub fn with_local_workers(mut self, n: usize) -> Self {
        self.config.local_workers = n;
        self
    }

    /// Add an SSH worker
    pub fn with_ssh_host(mut self, host: impl Into<String>) -> Self {
        self.config.ssh_hosts.push(host.into());
        self
    }

    /// Add a telnet worker
    pub fn with_telnet_host(mut self, host: impl Into<String>) -> Self {
        self.config.telnet_hosts.push(host.into());
        self
    }

    /// Login used by every telnet worker
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Directory remote workers run in
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = dir.into();
        self
    }

    /// Abandon a trainer invocation after `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Skip points already present in an earlier results log
    pub fn with_resume(mut self, log: impl Into<PathBuf>) -> Self {
        self.resume = Some(log.into());
        self
    }

    /// Write a JSON summary when the search finishes
    pub fn with_summary(mut self, path: impl Into<PathBuf>) -> Self {
        self.summary = Some(path.into());
        self
    }

    /// Report every result as it arrives
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// The configuration this search will run with
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// The evaluation plan
    pub fn plan(&self) -> Result<GridPlan> {
        GridPlan::new(&self.config.c_range, &self.config.g_range)
    }

    /// One executor per configured worker: telnet, then SSH, then local
    pub fn executors(&self) -> Result<Vec<Box<dyn Executor>>> {
        let command = TrainerCommand::from_config(&self.config);
        let timeout = self.config.timeout;
        let mut executors: Vec<Box<dyn Executor>> = Vec::with_capacity(self.config.worker_count());

        if !self.config.telnet_hosts.is_empty() {
            let credentials = self.credentials.clone().ok_or_else(|| {
                GridError::Configuration("telnet workers need a username and password".to_string())
            })?;
            for host in &self.config.telnet_hosts {
                executors.push(Box::new(
                    TelnetExecutor::new(
                        host.clone(),
                        credentials.clone(),
                        self.config.work_dir.clone(),
                        command.clone(),
                    )
                    .with_timeout(timeout),
                ));
            }
        }

        for host in &self.config.ssh_hosts {
            executors.push(Box::new(
                SshExecutor::new(host.clone(), self.config.work_dir.clone(), command.clone())
                    .with_timeout(timeout),
            ));
        }

        for _ in 0..self.config.local_workers {
            executors.push(Box::new(
                LocalExecutor::new(command.clone()).with_timeout(timeout),
            ));
        }

        Ok(executors)
    }

    /// Validate the configuration and run the search on the configured workers
    pub fn run(self) -> Result<SearchOutcome> {
        self.config.validate()?;
        let executors = self.executors()?;
        self.run_with(executors)
    }

    /// Run the search on caller-supplied executors.
    ///
    /// Skips the file checks of [`SearchConfig::validate`], the executors
    /// decide what they need.
    pub fn run_with(self, executors: Vec<Box<dyn Executor>>) -> Result<SearchOutcome> {
        if executors.is_empty() {
            return Err(GridError::Configuration(
                "at least one worker is required".to_string(),
            ));
        }

        let plan = self.plan()?;
        info!(
            "planned {} points in {} batches over {} workers",
            plan.len(),
            plan.batches.len(),
            executors.len()
        );

        let (log, resumed) = match &self.resume {
            Some(path) => {
                let resumed = load_results_log(path)?;
                info!("resuming with {} results from {}", resumed.len(), path.display());
                (ResultsLog::append(&self.config.out_file)?, resumed)
            }
            None => (ResultsLog::create(&self.config.out_file)?, Vec::new()),
        };

        let mut aggregator = ResultAggregator::new(log);
        aggregator.seed(resumed);
        if let Some(plotter) = self.start_plotter() {
            aggregator = aggregator.with_plotter(plotter, Some(self.config.png_file.clone()));
        }
        if let Some(progress) = self.progress {
            aggregator = aggregator.with_progress(progress);
        }

        let queue = Arc::new(JobQueue::with_jobs(
            plan.points().filter(|p| !aggregator.is_done(p)),
        ));
        let (pool, results) = WorkerPool::spawn(Arc::clone(&queue), executors)?;

        let collected = aggregator.run(&plan.batches, &results);
        drop(results);
        let exits = match collected {
            Ok(()) => pool.shutdown(),
            Err(e) => {
                pool.abort();
                return Err(e);
            }
        };

        let retired_workers = exits
            .iter()
            .filter(|e| matches!(e, WorkerExit::Retired { .. }))
            .count();
        if retired_workers > 0 {
            warn!("{retired_workers} worker(s) retired during the search");
        }

        let outcome = SearchOutcome {
            best: *aggregator.best(),
            results: aggregator.results().to_vec(),
            batches: plan.batches.len(),
            retired_workers,
        };
        info!("best {}", outcome.best);

        if let Some(path) = &self.summary {
            SearchSummary::new(
                &self.config,
                &outcome.best,
                &outcome.results,
                outcome.batches,
                outcome.retired_workers,
            )
            .save_to_file(path)?;
            info!("summary saved to: {}", path.display());
        }

        Ok(outcome)
    }

    fn start_plotter(&self) -> Option<Plotter> {
        let gnuplot = self.config.gnuplot.as_ref()?;
        let settings = PlotSettings {
            c_range: self.config.c_range,
            g_range: self.config.g_range,
            title: self.config.dataset_title(),
        };
        match Plotter::spawn(gnuplot, settings) {
            Ok(plotter) => Some(plotter),
            Err(e) => {
                warn!("continuing without plots: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{GridPoint, InvocationError};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    struct SumExecutor(&'static str);

    impl Executor for SumExecutor {
        fn name(&self) -> &str {
            self.0
        }

        fn invoke(&mut self, point: GridPoint) -> std::result::Result<f64, InvocationError> {
            Ok(point.c + point.g)
        }
    }

    /// Always fails; raises `failed` when it does
    struct FailingExecutor(Arc<AtomicBool>);

    impl Executor for FailingExecutor {
        fn name(&self) -> &str {
            "failing"
        }

        fn invoke(&mut self, _: GridPoint) -> std::result::Result<f64, InvocationError> {
            self.0.store(true, Ordering::SeqCst);
            Err(InvocationError::NoRate)
        }
    }

    /// Sums like `SumExecutor` but holds every job until `gate` is raised
    struct GatedExecutor {
        gate: Arc<AtomicBool>,
    }

    impl Executor for GatedExecutor {
        fn name(&self) -> &str {
            "ok"
        }

        fn invoke(&mut self, point: GridPoint) -> std::result::Result<f64, InvocationError> {
            while !self.gate.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(point.c + point.g)
        }
    }

    fn failing() -> Box<dyn Executor> {
        Box::new(FailingExecutor(Arc::new(AtomicBool::new(false))))
    }

    fn search(dir: &TempDir) -> GridSearch {
        GridSearch::new(dir.path().join("data"))
            .with_c_range(-1.0, 1.0, 1.0)
            .with_g_range(1.0, -1.0, -1.0)
            .with_out_file(dir.path().join("data.out"))
            .without_plot()
    }

    #[test]
    fn test_builder_sets_config() {
        let gs = GridSearch::new("heart_scale")
            .with_fold(10)
            .with_local_workers(3)
            .with_ssh_host("node1")
            .with_telnet_host("node2")
            .with_pass_through(["-m", "300"])
            .with_timeout(Duration::from_secs(60));

        let config = gs.config();
        assert_eq!(config.fold, 10);
        assert_eq!(config.worker_count(), 5);
        assert_eq!(config.pass_through, vec!["-m", "300"]);
        assert_eq!(config.timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_executors_follow_config() {
        let gs = GridSearch::new("heart_scale")
            .with_local_workers(2)
            .with_ssh_host("node1");
        let executors = gs.executors().unwrap();
        let names: Vec<&str> = executors.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["node1", "local", "local"]);
    }

    #[test]
    fn test_telnet_requires_credentials() {
        let gs = GridSearch::new("heart_scale").with_telnet_host("node2");
        assert!(matches!(gs.executors(), Err(GridError::Configuration(_))));

        let gs = GridSearch::new("heart_scale")
            .with_telnet_host("node2")
            .with_credentials(Credentials::new("alice", "secret"));
        assert_eq!(gs.executors().unwrap().len(), 2);
    }

    #[test]
    fn test_run_finds_maximum_sum() {
        let dir = TempDir::new().unwrap();
        let outcome = search(&dir)
            .run_with(vec![Box::new(SumExecutor("a")), Box::new(SumExecutor("b"))])
            .unwrap();

        assert_eq!(outcome.best.point, Some(GridPoint::new(1.0, 1.0)));
        assert_eq!(outcome.best.rate, 2.0);
        assert_eq!(outcome.results.len(), 9);
        assert_eq!(outcome.batches, 6);
        assert_eq!(outcome.retired_workers, 0);

        let log = std::fs::read_to_string(dir.path().join("data.out")).unwrap();
        assert_eq!(log.lines().count(), 9);
    }

    #[test]
    fn test_run_survives_one_broken_worker() {
        let dir = TempDir::new().unwrap();
        let gate = Arc::new(AtomicBool::new(false));
        let outcome = search(&dir)
            .run_with(vec![
                Box::new(FailingExecutor(Arc::clone(&gate))),
                Box::new(GatedExecutor { gate }),
            ])
            .unwrap();

        assert_eq!(outcome.results.len(), 9);
        assert!(outcome.results.iter().all(|r| r.worker == "ok"));
        assert_eq!(outcome.retired_workers, 1);
    }

    #[test]
    fn test_run_reports_pool_exhaustion() {
        let dir = TempDir::new().unwrap();
        let result = search(&dir).run_with(vec![failing(), failing()]);
        assert!(matches!(
            result,
            Err(GridError::PoolExhausted { unresolved: 9 })
        ));
    }

    #[test]
    fn test_run_without_executors_fails() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            search(&dir).run_with(Vec::new()),
            Err(GridError::Configuration(_))
        ));
    }

    #[test]
    fn test_resume_skips_known_points() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("data.out");
        std::fs::write(&out, "0 0 100\n1 1 2\n").unwrap();

        let outcome = search(&dir)
            .with_resume(&out)
            .run_with(vec![Box::new(SumExecutor("a"))])
            .unwrap();

        assert_eq!(outcome.results.len(), 9);
        assert_eq!(outcome.best.point, Some(GridPoint::new(0.0, 0.0)));
        assert_eq!(outcome.best.rate, 100.0);

        // Only the 7 new points were appended.
        let log = std::fs::read_to_string(&out).unwrap();
        assert_eq!(log.lines().count(), 9);
        assert!(log.starts_with("0 0 100\n1 1 2\n"));
    }

    #[test]
    fn test_summary_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("summary.json");
        search(&dir)
            .with_summary(&path)
            .run_with(vec![Box::new(SumExecutor("a"))])
            .unwrap();

        let summary = SearchSummary::load_from_file(&path).unwrap();
        assert_eq!(summary.results.len(), 9);
        assert_eq!(summary.best.unwrap().rate, 2.0);
    }

    #[test]
    fn test_run_validates_config() {
        let dir = TempDir::new().unwrap();
        let result = search(&dir).with_trainer("/nonexistent/svm-train").run();
        assert!(matches!(result, Err(GridError::Configuration(_))));
    }
}
