//! SSH backend
//!
//! Runs the trainer on a remote host through `ssh -x`, after changing into
//! the scheduler's working directory. The remote host is expected to see
//! the same filesystem layout (shared home or NFS).

use super::{parse_rate, run_process, TrainerCommand};
use crate::core::{Executor, GridPoint, InvocationError};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SshExecutor {
    host: String,
    work_dir: PathBuf,
    command: TrainerCommand,
    timeout: Option<Duration>,
    ssh_program: PathBuf,
}

impl SshExecutor {
    pub fn new(host: impl Into<String>, work_dir: PathBuf, command: TrainerCommand) -> Self {
        Self {
            host: host.into(),
            work_dir,
            command,
            timeout: None,
            ssh_program: PathBuf::from("ssh"),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a different ssh client binary
    pub fn with_ssh_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.ssh_program = program.into();
        self
    }

    /// The shell command executed on the remote side
    pub fn remote_command(&self, point: GridPoint) -> String {
        format!(
            "cd {}; {}",
            self.work_dir.display(),
            self.command.command_line(point)
        )
    }
}

impl Executor for SshExecutor {
    fn name(&self) -> &str {
        &self.host
    }

    fn invoke(&mut self, point: GridPoint) -> Result<f64, InvocationError> {
        let mut cmd = Command::new(&self.ssh_program);
        cmd.arg("-x").arg(&self.host).arg(self.remote_command(point));
        let output = run_process(cmd, self.timeout)?;
        parse_rate(&output)
    }
}
