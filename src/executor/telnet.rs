//! Telnet backend
//!
//! Keeps one interactive login session per worker. The session logs in
//! once, changes into the working directory and then types one trainer
//! command per job, waiting for the `Cross...` line to come back.
//!
//! There is no explicit login failure detection: the username echoed back
//! by the remote shell is taken as the success signal.

use super::{parse_rate, TrainerCommand};
use crate::core::{Executor, GridPoint, InvocationError};
use log::{debug, info};
use regex::bytes::Regex;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::time::Duration;

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

/// Default telnet port, used when the host has none
pub const TELNET_PORT: u16 = 23;

/// Login for telnet hosts, obtained once at startup
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Minimal line-mode telnet client over any byte stream.
///
/// All option negotiation is refused. Received data is kept in a buffer
/// until a caller consumes it with [`read_until`](Self::read_until) or
/// [`expect`](Self::expect).
pub struct TelnetSession<S> {
    stream: S,
    host: String,
    raw: Vec<u8>,
    cooked: Vec<u8>,
}

impl<S: Read + Write> TelnetSession<S> {
    pub fn new(stream: S, host: impl Into<String>) -> Self {
        Self {
            stream,
            host: host.into(),
            raw: Vec::new(),
            cooked: Vec::new(),
        }
    }

    /// Send `line` followed by a newline, escaping IAC bytes
    pub fn write_line(&mut self, line: &str) -> Result<(), InvocationError> {
        let mut out = Vec::with_capacity(line.len() + 1);
        for &b in line.as_bytes() {
            if b == IAC {
                out.push(IAC);
            }
            out.push(b);
        }
        out.push(b'\n');
        self.stream.write_all(&out)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Read until `needle` appears; returns everything up to and including it
    pub fn read_until(&mut self, needle: &str) -> Result<String, InvocationError> {
        let needle = needle.as_bytes();
        loop {
            if let Some(pos) = find(&self.cooked, needle) {
                return Ok(self.take(pos + needle.len()));
            }
            self.fill()?;
        }
    }

    /// Read until `pattern` matches; returns everything up to the match end
    pub fn expect(&mut self, pattern: &Regex) -> Result<String, InvocationError> {
        loop {
            if let Some(m) = pattern.find(&self.cooked) {
                return Ok(self.take(m.end()));
            }
            self.fill()?;
        }
    }

    /// Give back the underlying stream
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn take(&mut self, end: usize) -> String {
        let taken: Vec<u8> = self.cooked.drain(..end).collect();
        String::from_utf8_lossy(&taken).into_owned()
    }

    fn fill(&mut self) -> Result<(), InvocationError> {
        let mut buf = [0u8; 4096];
        let n = loop {
            match self.stream.read(&mut buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(InvocationError::Connection {
                        host: self.host.clone(),
                        reason: "read timed out".to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        };
        if n == 0 {
            return Err(InvocationError::Connection {
                host: self.host.clone(),
                reason: "connection closed by remote host".to_string(),
            });
        }
        self.raw.extend_from_slice(&buf[..n]);
        self.process_raw()
    }

    /// Move complete data out of `raw` into `cooked`, answering negotiation
    fn process_raw(&mut self) -> Result<(), InvocationError> {
        let mut reply = Vec::new();
        let mut i = 0;
        let raw = &self.raw;

        while i < raw.len() {
            let b = raw[i];
            if b != IAC {
                self.cooked.push(b);
                i += 1;
                continue;
            }
            let Some(&cmd) = raw.get(i + 1) else { break };
            match cmd {
                IAC => {
                    self.cooked.push(IAC);
                    i += 2;
                }
                DO | DONT | WILL | WONT => {
                    let Some(&opt) = raw.get(i + 2) else { break };
                    match cmd {
                        DO => reply.extend_from_slice(&[IAC, WONT, opt]),
                        WILL => reply.extend_from_slice(&[IAC, DONT, opt]),
                        _ => {}
                    }
                    i += 3;
                }
                SB => {
                    let end = raw[i + 2..]
                        .windows(2)
                        .position(|w| w == [IAC, SE]);
                    match end {
                        Some(pos) => i += 2 + pos + 2,
                        None => break,
                    }
                }
                _ => i += 2,
            }
        }

        self.raw.drain(..i);
        if !reply.is_empty() {
            self.stream.write_all(&reply)?;
            self.stream.flush()?;
        }
        Ok(())
    }

    /// Log in and change into `work_dir`
    pub fn login(
        &mut self,
        credentials: &Credentials,
        work_dir: &std::path::Path,
    ) -> Result<(), InvocationError> {
        self.read_until("login: ")?;
        self.write_line(&credentials.username)?;
        self.read_until("Password: ")?;
        self.write_line(&credentials.password)?;

        self.read_until(&credentials.username)?;
        info!("login ok {}", self.host);

        self.write_line(&format!("cd {}", work_dir.display()))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Runs the trainer through an interactive telnet session
pub struct TelnetExecutor {
    host: String,
    credentials: Credentials,
    work_dir: PathBuf,
    command: TrainerCommand,
    timeout: Option<Duration>,
    result_pattern: Regex,
    session: Option<TelnetSession<TcpStream>>,
}

impl TelnetExecutor {
    pub fn new(
        host: impl Into<String>,
        credentials: Credentials,
        work_dir: PathBuf,
        command: TrainerCommand,
    ) -> Self {
        Self {
            host: host.into(),
            credentials,
            work_dir,
            command,
            timeout: None,
            result_pattern: result_pattern(),
            session: None,
        }
    }

    /// Use `timeout` as the socket read timeout
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn address(&self) -> String {
        if self.host.contains(':') {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, TELNET_PORT)
        }
    }
}

fn result_pattern() -> Regex {
    // Literal pattern, always valid.
    Regex::new(r"Cross.*\n").expect("valid result pattern")
}

impl Executor for TelnetExecutor {
    fn name(&self) -> &str {
        &self.host
    }

    fn connect(&mut self) -> Result<(), InvocationError> {
        let connection_error = |reason: String| InvocationError::Connection {
            host: self.host.clone(),
            reason,
        };

        let stream =
            TcpStream::connect(self.address()).map_err(|e| connection_error(e.to_string()))?;
        stream
            .set_read_timeout(self.timeout)
            .map_err(|e| connection_error(e.to_string()))?;

        let mut session = TelnetSession::new(stream, self.host.clone());
        session.login(&self.credentials, &self.work_dir)?;
        self.session = Some(session);
        Ok(())
    }

    fn invoke(&mut self, point: GridPoint) -> Result<f64, InvocationError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| InvocationError::Connection {
                host: self.host.clone(),
                reason: "not logged in".to_string(),
            })?;

        let line = self.command.command_line(point);
        debug!("[{}] {}", self.host, line);
        session.write_line(&line)?;
        let output = session.expect(&self.result_pattern)?;
        parse_rate(&output)
    }

    fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = session.write_line("exit");
        }
    }
}
