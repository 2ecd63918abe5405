//! Subprocess boundary.
//!
//! Everything the validator shells out to (package managers, test runners)
//! goes through [`CommandRunner`], so tests can substitute a fake with
//! scripted output and timing.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::debug;

use crate::util::run_cmd_with_timeout;

/// A program with a fixed argument list, run in a working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl Invocation {
    /// Build from an argv vector whose first element is the program.
    /// Returns `None` for an empty vector.
    pub fn from_argv(argv: &[String], cwd: &Path) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            cwd: cwd.to_path_buf(),
        })
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal
    pub code: Option<i32>,
    /// stdout followed by stderr
    pub combined: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

pub trait CommandRunner: Send + Sync {
    /// Run to completion, or until `timeout` elapses when one is given.
    /// Spawn failures and timeouts are errors; a non-zero exit is not.
    fn run(&self, invocation: &Invocation, timeout: Option<Duration>)
        -> anyhow::Result<CommandOutput>;
}

/// Runs invocations as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        invocation: &Invocation,
        timeout: Option<Duration>,
    ) -> anyhow::Result<CommandOutput> {
        debug!(
            "Running `{}` in {}",
            invocation.display(),
            invocation.cwd.display()
        );
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args).current_dir(&invocation.cwd);

        let output = run_cmd_with_timeout(cmd, timeout)?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        debug!(
            "`{}` exited with {:?} ({} bytes of output)",
            invocation.program,
            output.status.code(),
            combined.len()
        );
        Ok(CommandOutput {
            code: output.status.code(),
            combined,
        })
    }
}
