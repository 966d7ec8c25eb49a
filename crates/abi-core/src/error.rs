use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid version {input:?}: {reason}")]
    InvalidVersion { input: String, reason: String },

    #[error("invalid public API manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("invalid namespace pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}
