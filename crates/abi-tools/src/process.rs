use std::env;
use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::ToolError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was ended by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn status_text(&self) -> String {
        match self.status {
            Some(code) => format!("exit {code}"),
            None => "killed by signal".to_string(),
        }
    }
}

/// External command with an optional wall-clock limit.
#[derive(Clone, Debug)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
    timeout: Option<Duration>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), args: Vec::new(), timeout: None }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Runs to completion. A non-zero exit is not an error here; callers
    /// decide what exit codes mean. Exceeding the timeout kills the process.
    pub fn run(&self) -> Result<ProcessOutput, ToolError> {
        let program = self.program_name();
        debug!(program = %program, args = ?self.args, "running tool");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ToolError::Spawn { program: program.clone(), source })?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(source) => return Err(ToolError::Spawn { program, source }),
            }
            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    let _ = child.kill();
                    let _ = child.wait();
                    debug!(program = %program, "tool timed out");
                    return Err(ToolError::TimedOut { program, millis: limit.as_millis() });
                }
            }
            thread::sleep(POLL_INTERVAL);
        };

        let collect = |h: Option<thread::JoinHandle<Vec<u8>>>| {
            h.and_then(|h| h.join().ok())
                .map(|b| String::from_utf8_lossy(&b).into_owned())
                .unwrap_or_default()
        };
        Ok(ProcessOutput { status: status.code(), stdout: collect(stdout), stderr: collect(stderr) })
    }

    /// Runs and requires exit status 0.
    pub fn run_checked(&self) -> Result<ProcessOutput, ToolError> {
        let out = self.run()?;
        if !out.success() {
            return Err(ToolError::Failed {
                program: self.program_name(),
                status: out.status_text(),
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(out)
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

/// Resolves a program name to an executable path. Names containing a path
/// separator are taken as paths; bare names are searched on `PATH`.
pub fn resolve_program(name: &str) -> Option<PathBuf> {
    let dirs: Vec<PathBuf> = env::var_os("PATH")
        .map(|p| env::split_paths(&p).collect())
        .unwrap_or_default();
    resolve_in(name, &dirs)
}

pub fn resolve_in(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    if name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') {
        let p = PathBuf::from(name);
        return is_executable(&p).then_some(p);
    }
    dirs.iter().map(|d| d.join(name)).find(|p| is_executable(p))
}

/// Resolved program or a `NotFound` error naming the tool.
pub fn require_program(tool: &str, name: &str) -> Result<PathBuf, ToolError> {
    resolve_program(name).ok_or_else(|| ToolError::NotFound { tool: tool.to_string(), program: name.to_string() })
}

/// First line of `<program> --version`.
pub fn tool_version(program: &Path, timeout: Duration) -> Result<String, ToolError> {
    let out = ToolCommand::new(program).arg("--version").timeout(timeout).run_checked()?;
    let text = if out.stdout.trim().is_empty() { &out.stderr } else { &out.stdout };
    Ok(text.lines().next().unwrap_or("").trim().to_string())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
