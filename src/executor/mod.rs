//! Trainer invocation backends
//!
//! Every backend runs the same trainer command line and reads the result
//! the same way: the first output line containing `Cross` carries the rate
//! as its last whitespace-separated token, optionally followed by `%`.
//! Only the transport differs.

pub mod local;
pub mod ssh;
pub mod telnet;

pub use self::local::*;
pub use self::ssh::*;
pub use self::telnet::*;

use crate::core::{GridPoint, InvocationError, SearchConfig};
use log::debug;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// Marker identifying the trainer's cross-validation line
pub const RESULT_MARKER: &str = "Cross";

/// How often a timed subprocess is polled for exit
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Trainer command template shared by all backends
#[derive(Debug, Clone, PartialEq)]
pub struct TrainerCommand {
    pub trainer: PathBuf,
    pub fold: u32,
    pub pass_through: Vec<String>,
    pub dataset: PathBuf,
}

impl TrainerCommand {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            trainer: config.trainer.clone(),
            fold: config.fold,
            pass_through: config.pass_through.clone(),
            dataset: config.dataset.clone(),
        }
    }

    /// Arguments for `point`, without the program itself
    pub fn args(&self, point: GridPoint) -> Vec<String> {
        let mut args = vec![
            "-c".to_string(),
            point.cost().to_string(),
            "-g".to_string(),
            point.gamma().to_string(),
            "-v".to_string(),
            self.fold.to_string(),
        ];
        args.extend(self.pass_through.iter().cloned());
        args.push(self.dataset.display().to_string());
        args
    }

    /// Full command line for backends that go through a remote shell
    pub fn command_line(&self, point: GridPoint) -> String {
        let mut parts = vec![self.trainer.display().to_string()];
        parts.extend(self.args(point));
        parts.join(" ")
    }
}

/// Extract the cross-validation rate from trainer output
pub fn parse_rate(output: &str) -> Result<f64, InvocationError> {
    let line = output
        .lines()
        .find(|line| line.contains(RESULT_MARKER))
        .ok_or(InvocationError::NoRate)?;

    let token = line
        .split_whitespace()
        .last()
        .ok_or_else(|| InvocationError::InvalidRate(line.to_string()))?;
    let token = token.strip_suffix('%').unwrap_or(token);

    token
        .parse::<f64>()
        .map_err(|_| InvocationError::InvalidRate(token.to_string()))
}

/// Run a subprocess to completion and return its stdout.
///
/// With a timeout the child is killed once the deadline passes, and its
/// output must also be fully read by then. Only the direct child is killed:
/// a grandchild that inherited stdout keeps running, and the reader thread
/// waiting on that pipe is left detached until the pipe closes.
pub(crate) fn run_process(
    mut command: Command,
    timeout: Option<Duration>,
) -> Result<String, InvocationError> {
    let description = format!("{command:?}");
    debug!("running {description}");

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|source| InvocationError::Launch {
            command: description.clone(),
            source,
        })?;

    let Some(timeout) = timeout else {
        let output = child.wait_with_output()?;
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    };

    let mut stdout = child.stdout.take().ok_or_else(|| InvocationError::Launch {
        command: description.clone(),
        source: io::Error::new(io::ErrorKind::Other, "stdout not captured"),
    })?;
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = tx.send(stdout.read_to_end(&mut buf).map(|_| buf));
    });

    let deadline = Instant::now() + timeout;
    loop {
        if child.try_wait()?.is_some() {
            break;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(InvocationError::Timeout(timeout));
        }
        thread::sleep(POLL_INTERVAL);
    }

    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(buf) => Ok(String::from_utf8_lossy(&buf?).into_owned()),
        Err(RecvTimeoutError::Timeout) => {
            debug!("{description} exited but its output is still open");
            Err(InvocationError::Timeout(timeout))
        }
        Err(RecvTimeoutError::Disconnected) => Err(InvocationError::Io(io::Error::new(
            io::ErrorKind::Other,
            "output reader panicked",
        ))),
    }
}
