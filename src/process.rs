//! Small builder around `std::process::Command` for driving host tools.

use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, ExitStatus, Output};

/// A host command invocation with uniform error reporting.
pub struct Cmd {
    program: String,
    args: Vec<OsString>,
    error_msg: Option<String>,
    allow_fail: bool,
}

impl Cmd {
    pub fn new(program: &str) -> Self {
        Cmd {
            program: program.to_string(),
            args: Vec::new(),
            error_msg: None,
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.as_os_str().to_os_string());
        self
    }

    /// Message prefixed to the failure report when the command exits non-zero.
    pub fn error_msg(mut self, msg: &str) -> Self {
        self.error_msg = Some(msg.to_string());
        self
    }

    /// A non-zero exit becomes an `Ok` status instead of an error.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    fn output(&self) -> Result<Output> {
        Command::new(&self.program)
            .args(&self.args)
            .output()
            .with_context(|| format!("failed to spawn '{}'", self.program))
    }

    /// Run the command, capturing output.
    pub fn run(self) -> Result<ExitStatus> {
        let output = self.output()?;
        if !output.status.success() && !self.allow_fail {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let msg = self
                .error_msg
                .unwrap_or_else(|| format!("'{}' failed", self.program));
            bail!("{}: {}", msg, stderr.trim());
        }
        Ok(output.status)
    }

    /// Run the command and return its trimmed stdout.
    pub fn capture_stdout(self) -> Result<String> {
        let output = self.output()?;
        if !output.status.success() && !self.allow_fail {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let msg = self
                .error_msg
                .unwrap_or_else(|| format!("'{}' failed", self.program));
            bail!("{}: {}", msg, stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
