//! Error types for gridsweep

use thiserror::Error;

/// Main error type for gridsweep
#[derive(Error, Debug)]
pub enum SweepError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Device list error
    #[error("Invalid device list: {0}")]
    Devices(String),

    /// A template still has placeholders after every binding is known
    #[error("Unresolved template '{name}': {template} (missing: {})", .missing.join(", "))]
    UnresolvedTemplate {
        name: String,
        template: String,
        missing: Vec<String>,
    },

    /// Two runs resolved to the same output root
    #[error("Runs {first} and {second} share the output root {root}")]
    DuplicateOutputRoot {
        first: usize,
        second: usize,
        root: String,
    },

    /// Execution error
    #[error("Execution error: {0}")]
    Execution(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SweepError {
    /// Whether this error aborts the sweep before anything is dispatched
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SweepError::Config(_)
                | SweepError::Devices(_)
                | SweepError::UnresolvedTemplate { .. }
                | SweepError::DuplicateOutputRoot { .. }
        )
    }
}

/// Result type for gridsweep operations
pub type SweepResult<T> = Result<T, SweepError>;

impl From<serde_json::Error> for SweepError {
    fn from(err: serde_json::Error) -> Self {
        SweepError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for SweepError {
    fn from(err: toml::de::Error) -> Self {
        SweepError::Config(err.to_string())
    }
}
