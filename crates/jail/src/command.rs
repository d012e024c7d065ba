use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Stdio};

use tracing::trace;

/// Error from a command that could not be spawned or did not succeed.
#[derive(Debug, thiserror::Error)]
#[error("command failed: {command}\n{detail}")]
pub struct CommandError {
    pub command: String,
    pub detail: String,
}

/// A fully composed external command.
///
/// Built only by [`crate::compose`]; everything else just runs them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Discard stdout and stderr.
    pub quiet: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            quiet: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        if self.quiet {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        cmd
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&shell_words::join(self.argv()))
    }
}

/// Runs composed commands. The seam between jail logic and the host.
pub trait Runner {
    /// Run to completion with inherited stdio and return the exit code.
    fn run(&self, inv: &Invocation) -> Result<i32, CommandError>;

    /// Run to completion capturing stdout. Non-zero exit is an error.
    fn capture(&self, inv: &Invocation) -> Result<String, CommandError>;
}

/// [`Runner`] backed by real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl Runner for SystemRunner {
    fn run(&self, inv: &Invocation) -> Result<i32, CommandError> {
        trace!(cmd = %inv, "run");
        let status = inv.to_command().status().map_err(|e| CommandError {
            command: inv.to_string(),
            detail: e.to_string(),
        })?;
        Ok(exit_code(status))
    }

    fn capture(&self, inv: &Invocation) -> Result<String, CommandError> {
        trace!(cmd = %inv, "capture");
        let output = inv
            .to_command()
            .stdin(Stdio::null())
            .output()
            .map_err(|e| CommandError {
                command: inv.to_string(),
                detail: e.to_string(),
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(CommandError {
                command: inv.to_string(),
                detail: format!("exited with {}: {stderr}", exit_code(output.status)),
            })
        }
    }
}

/// Exit code of a finished process; a signal death maps to `128 + signal`.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}
