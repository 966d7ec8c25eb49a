use anyhow::{Context, Result};
use tracing::warn;

use abi_tools::{Abidiff, Abidw, BaselineGenerator, CxxFilt, NmLister, SymbolLister, TypedDiffer};

use crate::Config;

/// External tools behind their traits, so tests can swap in fakes.
pub struct Toolkit {
    pub generator: Box<dyn BaselineGenerator>,
    pub differ: Box<dyn TypedDiffer>,
    /// Needed only for the symbol-table fallback.
    pub lister: Option<Box<dyn SymbolLister>>,
    pub demangler: CxxFilt,
}

impl Toolkit {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let t = &cfg.tools;
        let abidw = Abidw::locate(&t.abidw).context("locate baseline generator")?;
        let abidiff = Abidiff::locate(&t.abidiff).context("locate differ")?;
        let lister: Option<Box<dyn SymbolLister>> = match NmLister::locate(&t.nm) {
            Ok(nm) => Some(Box::new(nm)),
            Err(e) => {
                warn!(error = %e, "symbol-table fallback unavailable");
                None
            }
        };
        Ok(Self {
            generator: Box::new(abidw.with_timeout(t.baseline_timeout())),
            differ: Box::new(abidiff.with_timeout(t.diff_timeout())),
            lister,
            demangler: CxxFilt::locate(&t.cxxfilt).with_timeout(t.demangle_timeout()),
        })
    }
}
