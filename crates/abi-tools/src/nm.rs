use std::path::{Path, PathBuf};
use std::time::Duration;

use abi_core::{parse_nm_output, DynSymbol};

use crate::error::ToolError;
use crate::process::{require_program, ToolCommand};
use crate::types::SymbolLister;

pub const DEFAULT_NM_TIMEOUT: Duration = Duration::from_secs(120);

/// `nm -D --defined-only` symbol lister.
#[derive(Clone, Debug)]
pub struct NmLister {
    program: PathBuf,
    timeout: Duration,
}

impl NmLister {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), timeout: DEFAULT_NM_TIMEOUT }
    }

    pub fn locate(name: &str) -> Result<Self, ToolError> {
        Ok(Self::new(require_program("nm", name)?))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl SymbolLister for NmLister {
    fn list(&self, library: &Path) -> Result<Vec<DynSymbol>, ToolError> {
        let out = ToolCommand::new(&self.program)
            .args(["-D", "--defined-only"])
            .arg(library)
            .timeout(self.timeout)
            .run_checked()?;
        Ok(parse_nm_output(&out.stdout))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::test_support::script;
    use tempfile::tempdir;

    #[test]
    fn lists_exported_symbols() {
        let dir = tempdir().unwrap();
        let tool = script(
            dir.path(),
            "nm",
            "[ \"$1\" = -D ] || exit 2\ncat <<'EOF'\n0000000000001000 T _ZN3foo3barEv\n0000000000004000 D foo_table\n0000000000001100 t local_helper\n                 w __gmon_start__\nEOF",
        );
        let symbols = NmLister::new(&tool).list(Path::new("libfoo.so")).unwrap();
        let names: Vec<_> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["_ZN3foo3barEv", "foo_table"]);
    }
}
