use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use crate::error::{DeployError, DeployResult};

/// A single external program invocation: program, arguments,
/// extra environment, optional stdin payload and working dir.
///
/// # Example
///
/// ```
/// use alicerce::cmd::Invocation;
///
/// let inv = Invocation::new("systemctl")
///     .arg("is-active")
///     .arg("nginx");
///
/// assert_eq!(inv.to_string(), "systemctl is-active nginx");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    #[must_use]
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child. Values are
    /// never included in the display form.
    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// Set several environment variables at once.
    #[must_use]
    pub fn envs<'k, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (&'k str, &'k str)>,
    {
        self.env.extend(vars.into_iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self
    }

    #[must_use]
    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        for (k, v) in &self.env {
            command.env(k, v);
        }
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }
        command
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// The machine provisioning commands run against.
///
/// [`LocalHost`] spawns real processes; tests substitute a
/// recording implementation.
pub trait Host {
    /// Run to completion and capture trimmed stdout. Fails if the
    /// program exits non-zero.
    fn exec(&self, invocation: &Invocation) -> DeployResult<String>;

    /// Run with stdout/stderr inherited so the operator sees
    /// long-running output (package installs).
    fn exec_interactive(&self, invocation: &Invocation) -> DeployResult<()>;

    /// Check if a program exists on PATH.
    fn command_exists(&self, program: &str) -> bool;
}

/// The host this process runs on.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalHost;

impl Host for LocalHost {
    fn exec(&self, invocation: &Invocation) -> DeployResult<String> {
        let output = spawn(invocation)?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            log::debug!("{invocation} stderr: {stderr}");
            Err(DeployError::CommandFailed {
                command: invocation.to_string(),
                status: output.status,
                stderr,
            })
        }
    }

    fn exec_interactive(&self, invocation: &Invocation) -> DeployResult<()> {
        let mut command = invocation.command();
        command
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let status = if let Some(data) = &invocation.stdin {
            let mut child = command
                .stdin(Stdio::piped())
                .spawn()
                .map_err(|e| not_found_or_io(&invocation.program, e))?;
            if let Some(stdin) = &mut child.stdin {
                stdin.write_all(data)?;
            }
            drop(child.stdin.take());
            child.wait()?
        } else {
            command
                .stdin(Stdio::inherit())
                .status()
                .map_err(|e| not_found_or_io(&invocation.program, e))?
        };

        if status.success() {
            Ok(())
        } else {
            Err(DeployError::CommandFailed {
                command: invocation.to_string(),
                status,
                stderr: String::new(),
            })
        }
    }

    fn command_exists(&self, program: &str) -> bool {
        Command::new("which")
            .arg(program)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }
}

fn spawn(invocation: &Invocation) -> DeployResult<Output> {
    let mut command = invocation.command();
    command.stdout(Stdio::piped()).stderr(Stdio::piped());

    let Some(data) = &invocation.stdin else {
        return command
            .stdin(Stdio::null())
            .output()
            .map_err(|e| not_found_or_io(&invocation.program, e));
    };

    let mut child = command
        .stdin(Stdio::piped())
        .spawn()
        .map_err(|e| not_found_or_io(&invocation.program, e))?;

    if let Some(stdin) = &mut child.stdin {
        stdin.write_all(data)?;
    }
    drop(child.stdin.take());

    Ok(child.wait_with_output()?)
}

fn not_found_or_io(program: &str, e: std::io::Error) -> DeployError {
    if e.kind() == std::io::ErrorKind::NotFound {
        DeployError::CommandNotFound(program.to_string())
    } else {
        DeployError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_omits_env_and_stdin() {
        let inv = Invocation::new("mysql")
            .args(["--user=root", "--batch"])
            .env("MYSQL_PWD", "hunter2")
            .stdin("SELECT 1;");

        let shown = inv.to_string();

        assert_eq!(shown, "mysql --user=root --batch");
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn local_host_captures_stdout() {
        let out = LocalHost
            .exec(&Invocation::new("sh").args(["-c", "echo '  hello  '"]))
            .expect("sh should run");

        assert_eq!(out, "hello");
    }

    #[test]
    fn local_host_pipes_stdin() {
        let out = LocalHost
            .exec(&Invocation::new("cat").stdin("piped"))
            .expect("cat should run");

        assert_eq!(out, "piped");
    }

    #[test]
    fn local_host_reports_failure_with_stderr() {
        let err = LocalHost
            .exec(&Invocation::new("sh").args(["-c", "echo boom >&2; exit 3"]))
            .unwrap_err();

        assert!(matches!(err, DeployError::CommandFailed { .. }));
        assert_eq!(err.stderr(), Some("boom"));
    }

    #[test]
    fn local_host_missing_program() {
        let err = LocalHost
            .exec(&Invocation::new("definitely-not-a-real-program-xyz"))
            .unwrap_err();

        assert!(matches!(err, DeployError::CommandNotFound(_)));
    }
}
