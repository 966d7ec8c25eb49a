use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use abi_core::Demangler;
use tracing::debug;

use crate::process::{resolve_program, ToolCommand};

pub const DEFAULT_DEMANGLE_TIMEOUT: Duration = Duration::from_secs(5);
const BATCH_SIZE: usize = 256;

/// Demangler backed by `c++filt`, with a per-process cache.
///
/// Any failure (missing tool, timeout, odd output) yields the input name.
#[derive(Debug)]
pub struct CxxFilt {
    program: Option<PathBuf>,
    timeout: Duration,
    cache: Mutex<HashMap<String, String>>,
}

impl CxxFilt {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: Some(program.into()), timeout: DEFAULT_DEMANGLE_TIMEOUT, cache: Mutex::new(HashMap::new()) }
    }

    /// Resolves `name` on PATH; without it every name passes through.
    pub fn locate(name: &str) -> Self {
        let program = resolve_program(name);
        if program.is_none() {
            debug!(program = name, "demangler not found; names will not be demangled");
        }
        Self { program, timeout: DEFAULT_DEMANGLE_TIMEOUT, cache: Mutex::new(HashMap::new()) }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_available(&self) -> bool {
        self.program.is_some()
    }

    /// Demangles many names with few tool invocations and fills the cache.
    pub fn prefetch<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        let Some(program) = &self.program else { return };
        let pending: Vec<&str> = {
            let Ok(cache) = self.cache.lock() else { return };
            let mut seen = std::collections::HashSet::new();
            names
                .into_iter()
                .filter(|n| n.starts_with("_Z") && !cache.contains_key(*n) && seen.insert(*n))
                .collect()
        };
        for chunk in pending.chunks(BATCH_SIZE) {
            let out = match ToolCommand::new(program).args(chunk).timeout(self.timeout).run_checked() {
                Ok(out) => out,
                Err(err) => {
                    debug!(error = %err, "c++filt batch failed");
                    continue;
                }
            };
            let lines: Vec<&str> = out.stdout.lines().collect();
            if lines.len() != chunk.len() {
                continue;
            }
            if let Ok(mut cache) = self.cache.lock() {
                for (raw, demangled) in chunk.iter().zip(lines) {
                    cache.insert((*raw).to_string(), demangled.trim().to_string());
                }
            }
        }
    }

    fn demangle_one(&self, raw: &str) -> String {
        let Some(program) = &self.program else {
            return raw.to_string();
        };
        match ToolCommand::new(program).arg(raw).timeout(self.timeout).run_checked() {
            Ok(out) => {
                let text = out.stdout.trim();
                if text.is_empty() {
                    raw.to_string()
                } else {
                    text.to_string()
                }
            }
            Err(err) => {
                debug!(symbol = raw, error = %err, "c++filt failed");
                raw.to_string()
            }
        }
    }
}

impl Demangler for CxxFilt {
    fn demangle(&self, raw: &str) -> String {
        if let Ok(cache) = self.cache.lock() {
            if let Some(hit) = cache.get(raw) {
                return hit.clone();
            }
        }
        let demangled = self.demangle_one(raw);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(raw.to_string(), demangled.clone());
        }
        demangled
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::test_support::script;
    use std::fs;
    use tempfile::tempdir;

    // Maps _ZN3foo3barEv to foo::bar() and echoes anything else. Each
    // invocation appends a line to calls.log.
    fn fake_cxxfilt(dir: &std::path::Path) -> PathBuf {
        let log = dir.join("calls.log");
        script(
            dir,
            "c++filt",
            &format!(
                "echo call >> {}\nfor a in \"$@\"; do if [ \"$a\" = _ZN3foo3barEv ]; then echo 'foo::bar()'; else echo \"$a\"; fi; done",
                log.display()
            ),
        )
    }

    fn calls(dir: &std::path::Path) -> usize {
        fs::read_to_string(dir.join("calls.log")).map(|s| s.lines().count()).unwrap_or(0)
    }

    #[test]
    fn demangles_and_caches() {
        let dir = tempdir().unwrap();
        let filt = CxxFilt::new(fake_cxxfilt(dir.path()));
        assert_eq!(filt.demangle("_ZN3foo3barEv"), "foo::bar()");
        assert_eq!(filt.demangle("_ZN3foo3barEv"), "foo::bar()");
        assert_eq!(calls(dir.path()), 1);
    }

    #[test]
    fn prefetch_uses_one_invocation() {
        let dir = tempdir().unwrap();
        let filt = CxxFilt::new(fake_cxxfilt(dir.path()));
        filt.prefetch(["_ZN3foo3barEv", "_ZN3baz1qEv", "plain_c", "_ZN3foo3barEv"]);
        assert_eq!(calls(dir.path()), 1);
        assert_eq!(filt.demangle("_ZN3foo3barEv"), "foo::bar()");
        assert_eq!(filt.demangle("_ZN3baz1qEv"), "_ZN3baz1qEv");
        assert_eq!(calls(dir.path()), 1);
    }

    #[test]
    fn failure_returns_input() {
        let dir = tempdir().unwrap();
        let broken = script(dir.path(), "c++filt", "exit 1");
        assert_eq!(CxxFilt::new(broken).demangle("_ZN1a1bEv"), "_ZN1a1bEv");

        let slow = script(dir.path(), "slowfilt", "sleep 5");
        let filt = CxxFilt::new(slow).with_timeout(Duration::from_millis(100));
        assert_eq!(filt.demangle("_ZN1a1bEv"), "_ZN1a1bEv");

        let missing = CxxFilt::new("/nonexistent/c++filt");
        assert_eq!(missing.demangle("_ZN1a1bEv"), "_ZN1a1bEv");
        let unresolved = CxxFilt::locate("/nonexistent/c++filt");
        assert!(!unresolved.is_available());
        assert_eq!(unresolved.demangle("_ZN1a1bEv"), "_ZN1a1bEv");
    }
}
