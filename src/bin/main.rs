//! svm-grid command line interface
//!
//! Runs a parallel (C, gamma) grid search for an SVM trainer on a dataset,
//! printing every result as it arrives and the best parameters at the end.

use clap::Parser;
use env_logger::Env;
use log::{error, info};
use std::io::{self, BufRead, IsTerminal};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use svmgrid::core::{GridError, Result};
use svmgrid::persistence::SearchSummary;
use svmgrid::{BestParam, Credentials, EvalResult, GridSearch, RangeSpec, SearchConfig};

#[derive(Parser)]
#[command(name = "svm-grid")]
#[command(about = "Parallel (C, gamma) grid search for SVM cross-validation")]
#[command(version = svmgrid::VERSION)]
#[command(author = "svmgrid contributors")]
struct Cli {
    /// Range of log2(C) as begin,end,step
    #[arg(
        long = "log2c",
        value_name = "BEGIN,END,STEP",
        default_value = "-5,15,2",
        allow_hyphen_values = true
    )]
    log2c: RangeSpec,

    /// Range of log2(gamma) as begin,end,step
    #[arg(
        long = "log2g",
        value_name = "BEGIN,END,STEP",
        default_value = "3,-15,-2",
        allow_hyphen_values = true
    )]
    log2g: RangeSpec,

    /// Number of cross-validation folds
    #[arg(short = 'v', long, default_value = "5")]
    fold: u32,

    /// Trainer executable
    #[arg(long)]
    svmtrain: Option<PathBuf>,

    /// gnuplot executable
    #[arg(long)]
    gnuplot: Option<PathBuf>,

    /// Do not draw contour plots
    #[arg(long, conflicts_with = "gnuplot")]
    no_plot: bool,

    /// Results log (default: <dataset>.out)
    #[arg(long)]
    out: Option<PathBuf>,

    /// Contour image (default: <dataset>.png)
    #[arg(long)]
    png: Option<PathBuf>,

    /// Number of local workers
    #[arg(long, default_value = "1")]
    local_workers: usize,

    /// Run a worker on HOST through ssh (repeatable)
    #[arg(long = "ssh", value_name = "HOST")]
    ssh: Vec<String>,

    /// Run a worker on HOST through telnet (repeatable)
    #[arg(long = "telnet", value_name = "HOST")]
    telnet: Vec<String>,

    /// Username for telnet hosts (default: current user)
    #[arg(long)]
    telnet_user: Option<String>,

    /// Abandon a single trainer run after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Skip points found in an earlier results log (default: the --out file)
    #[arg(
        long,
        value_name = "FILE",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = ""
    )]
    resume: Option<PathBuf>,

    /// Write a JSON summary of the search and print it at the end
    #[arg(long, value_name = "FILE")]
    summary: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long)]
    verbose: bool,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    /// Renamed to --log2c
    #[arg(short = 'c', hide = true, allow_hyphen_values = true)]
    legacy_c: Option<String>,

    /// Renamed to --log2g
    #[arg(short = 'g', hide = true, allow_hyphen_values = true)]
    legacy_g: Option<String>,

    /// Dataset handed to the trainer
    dataset: PathBuf,

    /// Additional trainer arguments, given after `--`
    #[arg(last = true)]
    train_args: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    if let Err(e) = run(cli) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if cli.legacy_c.is_some() || cli.legacy_g.is_some() {
        return Err(GridError::InvalidParameter(
            "Option -c and -g are renamed, use --log2c and --log2g".to_string(),
        ));
    }

    let config = build_config(&cli);
    info!("Dataset: {}", config.dataset.display());
    info!(
        "log2c={} log2g={} fold={} workers={}",
        config.c_range,
        config.g_range,
        config.fold,
        config.worker_count()
    );

    let resume = cli.resume.as_ref().map(|path| {
        if path.as_os_str().is_empty() {
            config.out_file.clone()
        } else {
            path.clone()
        }
    });

    let mut search =
        GridSearch::from_config(config.clone()).with_progress(Box::new(print_progress));
    if !config.telnet_hosts.is_empty() {
        search = search.with_credentials(read_credentials(cli.telnet_user.clone())?);
    }
    if let Some(path) = resume {
        search = search.with_resume(path);
    }
    if let Some(path) = &cli.summary {
        search = search.with_summary(path);
    }

    let outcome = search.run()?;
    if outcome.retired_workers > 0 {
        info!("{} worker(s) retired early", outcome.retired_workers);
    }
    if let Some(path) = &cli.summary {
        SearchSummary::load_from_file(path)?.print_summary();
    }
    println!("{}", outcome.best);
    Ok(())
}

fn build_config(cli: &Cli) -> SearchConfig {
    let mut config = SearchConfig::new(&cli.dataset);
    config.c_range = cli.log2c;
    config.g_range = cli.log2g;
    config.fold = cli.fold;
    if let Some(trainer) = &cli.svmtrain {
        config.trainer = trainer.clone();
    }
    if cli.no_plot {
        config.gnuplot = None;
    } else if let Some(gnuplot) = &cli.gnuplot {
        config.gnuplot = Some(gnuplot.clone());
    }
    if let Some(out) = &cli.out {
        config.out_file = out.clone();
    }
    if let Some(png) = &cli.png {
        config.png_file = png.clone();
    }
    config.pass_through = cli.train_args.clone();
    config.local_workers = cli.local_workers;
    config.ssh_hosts = cli.ssh.clone();
    config.telnet_hosts = cli.telnet.clone();
    config.timeout = cli.timeout.map(Duration::from_secs);
    config
}

fn print_progress(result: &EvalResult, best: &BestParam) {
    let (best_c, best_g) = best
        .point
        .map_or((f64::NAN, f64::NAN), |p| (p.cost(), p.gamma()));
    println!(
        "[{}] {} {} (best c={}, g={}, rate={})",
        result.worker, result.point, result.rate, best_c, best_g, best.rate
    );
}

/// Ask once for the telnet login
fn read_credentials(username: Option<String>) -> Result<Credentials> {
    let username = username
        .or_else(|| std::env::var("USER").ok())
        .or_else(|| std::env::var("USERNAME").ok())
        .ok_or_else(|| {
            GridError::Configuration(
                "cannot determine telnet username, use --telnet-user".to_string(),
            )
        })?;

    let password = if io::stdin().is_terminal() {
        rpassword::prompt_password("Password: ")?
    } else {
        read_password_from(io::stdin().lock())?
    };

    Ok(Credentials::new(username, password))
}

/// Read a password piped on stdin, without its line ending
fn read_password_from<R: BufRead>(mut reader: R) -> Result<String> {
    let mut password = String::new();
    reader.read_line(&mut password)?;
    Ok(password.trim_end_matches(&['\r', '\n'][..]).to_string())
}
