use std::path::Path;

use abi_core::DynSymbol;

use crate::error::ToolError;

/// Raw outcome of a typed diff. Exit codes 0/4/8/12 are all successful runs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiffOutcome {
    pub exit_code: i32,
    pub report: String,
    pub stderr: String,
}

/// Produces a typed ABI baseline from a shared library.
pub trait BaselineGenerator: Send + Sync {
    fn generate(&self, library: &Path, headers_dir: Option<&Path>, out: &Path) -> Result<(), ToolError>;
}

/// Compares two typed baselines.
pub trait TypedDiffer: Send + Sync {
    fn diff(&self, old: &Path, new: &Path, suppressions: Option<&Path>) -> Result<DiffOutcome, ToolError>;
}

/// Lists defined, exported dynamic symbols of a shared library.
pub trait SymbolLister: Send + Sync {
    fn list(&self, library: &Path) -> Result<Vec<DynSymbol>, ToolError>;
}
