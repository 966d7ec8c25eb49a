use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::error::ToolError;
use crate::process::{require_program, ToolCommand};
use crate::types::{BaselineGenerator, DiffOutcome, TypedDiffer};

pub const DEFAULT_ABIDW_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_ABIDIFF_TIMEOUT: Duration = Duration::from_secs(300);

/// `abidw` baseline generator.
#[derive(Clone, Debug)]
pub struct Abidw {
    program: PathBuf,
    timeout: Duration,
}

impl Abidw {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), timeout: DEFAULT_ABIDW_TIMEOUT }
    }

    /// Resolves `name` on PATH (or as a path).
    pub fn locate(name: &str) -> Result<Self, ToolError> {
        Ok(Self::new(require_program("abidw", name)?))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl BaselineGenerator for Abidw {
    fn generate(&self, library: &Path, headers_dir: Option<&Path>, out: &Path) -> Result<(), ToolError> {
        let mut cmd = ToolCommand::new(&self.program).timeout(self.timeout);
        if let Some(headers) = headers_dir {
            cmd = cmd.arg("--headers-dir").arg(headers);
        }
        cmd = cmd.arg("--out-file").arg(out).arg(library);
        cmd.run_checked()?;
        debug!(library = %library.display(), out = %out.display(), "baseline generated");
        Ok(())
    }
}

/// `abidiff` typed differ.
#[derive(Clone, Debug)]
pub struct Abidiff {
    program: PathBuf,
    timeout: Duration,
}

impl Abidiff {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), timeout: DEFAULT_ABIDIFF_TIMEOUT }
    }

    pub fn locate(name: &str) -> Result<Self, ToolError> {
        Ok(Self::new(require_program("abidiff", name)?))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl TypedDiffer for Abidiff {
    fn diff(&self, old: &Path, new: &Path, suppressions: Option<&Path>) -> Result<DiffOutcome, ToolError> {
        let mut cmd = ToolCommand::new(&self.program).timeout(self.timeout);
        if let Some(supp) = suppressions {
            cmd = cmd.arg("--suppressions").arg(supp);
        }
        let out = cmd.arg(old).arg(new).run()?;
        // A signal death has no exit code and no meaningful report.
        let Some(exit_code) = out.status else {
            return Err(ToolError::Failed {
                program: self.program.display().to_string(),
                status: out.status_text(),
                stderr: out.stderr.trim().to_string(),
            });
        };
        debug!(exit_code, "abidiff finished");
        Ok(DiffOutcome { exit_code, report: out.stdout, stderr: out.stderr })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::test_support::script;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn abidw_passes_headers_and_out_file() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("args.log");
        let tool = script(
            dir.path(),
            "abidw",
            &format!(
                "echo \"$@\" > {}\nwhile [ $# -gt 1 ]; do if [ \"$1\" = --out-file ]; then echo '<abi-corpus/>' > \"$2\"; fi; shift; done",
                log.display()
            ),
        );
        let out = dir.path().join("lib.abi");
        Abidw::new(&tool)
            .generate(Path::new("/lib/libx.so.1"), Some(Path::new("/inc")), &out)
            .unwrap();
        let args = fs::read_to_string(&log).unwrap();
        assert!(args.contains("--headers-dir /inc"));
        assert!(args.trim_end().ends_with("/lib/libx.so.1"));
        assert!(out.exists());
    }

    #[test]
    fn abidw_failure_is_crash() {
        let dir = tempdir().unwrap();
        let tool = script(dir.path(), "abidw", "echo 'bad ELF' >&2; exit 1");
        let err = Abidw::new(&tool)
            .generate(Path::new("x.so"), None, &dir.path().join("o"))
            .unwrap_err();
        assert!(err.is_crash());
        assert!(err.to_string().contains("bad ELF"));
    }

    #[test]
    fn abidiff_nonzero_exit_is_a_result() {
        let dir = tempdir().unwrap();
        let tool = script(dir.path(), "abidiff", "echo 'Functions changes summary: 1 Removed'; exit 12");
        let outcome = Abidiff::new(&tool).diff(Path::new("a"), Path::new("b"), None).unwrap();
        assert_eq!(outcome.exit_code, 12);
        assert!(outcome.report.contains("1 Removed"));
    }

    #[test]
    fn abidiff_signal_is_failure() {
        let dir = tempdir().unwrap();
        let tool = script(dir.path(), "abidiff", "kill -9 $$");
        let err = Abidiff::new(&tool).diff(Path::new("a"), Path::new("b"), None).unwrap_err();
        assert!(matches!(err, ToolError::Failed { .. }));
    }

    #[test]
    fn locate_missing_tool() {
        let err = Abidw::locate("/nonexistent/abidw").unwrap_err();
        assert!(err.is_missing());
    }
}
