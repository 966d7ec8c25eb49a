use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} not found: {program:?} does not resolve on PATH")]
    NotFound { tool: String, program: String },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} timed out after {millis} ms")]
    TimedOut { program: String, millis: u128 },

    #[error("{program} failed ({status}): {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

impl ToolError {
    /// The tool is absent or not runnable: a configuration problem.
    pub fn is_missing(&self) -> bool {
        match self {
            ToolError::NotFound { .. } => true,
            ToolError::Spawn { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ),
            _ => false,
        }
    }

    /// The tool ran but failed on this input (crash, bad exit, timeout).
    pub fn is_crash(&self) -> bool {
        !self.is_missing()
    }
}
