//! Local subprocess backend

use super::{parse_rate, run_process, TrainerCommand};
use crate::core::{Executor, GridPoint, InvocationError};
use std::process::Command;
use std::time::Duration;

/// Runs the trainer as a child process on this machine
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    command: TrainerCommand,
    timeout: Option<Duration>,
}

impl LocalExecutor {
    pub fn new(command: TrainerCommand) -> Self {
        Self {
            command,
            timeout: None,
        }
    }

    /// Kill the trainer if it runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Executor for LocalExecutor {
    fn name(&self) -> &str {
        "local"
    }

    fn invoke(&mut self, point: GridPoint) -> Result<f64, InvocationError> {
        let mut cmd = Command::new(&self.command.trainer);
        cmd.args(self.command.args(point));
        let output = run_process(cmd, self.timeout)?;
        parse_rate(&output)
    }
}
