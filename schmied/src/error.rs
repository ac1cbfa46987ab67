//! Error types crossing component boundaries.

use std::path::PathBuf;

use thiserror::Error;

/// A step failed to apply its side effect, or the project state is
/// inconsistent in a way the engine refuses to paper over. Fatal for the
/// invocation.
#[derive(Debug, Error)]
pub enum InsertionError {
    #[error("{0}")]
    Failed(String),

    /// A required external tool is missing. Preflight failure.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// A required input file or folder is missing. Preflight failure.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// The step performed its side effect but cannot produce a dependency
    /// report. An opt-out, not a hard failure: the engine records the event
    /// and stops collecting reports for the remainder of the build.
    #[error("no dependency report available for {0}")]
    NoDependencyReport(String),

    #[error(transparent)]
    Assembler(#[from] convenient_asar::AsarError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Build report persistence failures.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to access build report at '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("build report at '{path}' is malformed: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration at '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("configuration is malformed: {0}")]
    Malformed(#[from] serde_yaml::Error),

    #[error("unknown build order entry '{0}'")]
    UnknownBuildOrderEntry(String),

    #[error("conflict policy must be 'none', 'hijacks' or 'all', got '{0}'")]
    UnknownConflictPolicy(String),
}

/// Errors the quick builder propagates internally. `MustRebuild` is control
/// flow, not an anomaly: it is converted to an ordinary outcome variant at
/// the public boundary, and only genuine failures stay on the error channel.
#[derive(Debug, Error)]
pub enum QuickBuildError {
    /// The quick-build premises are not satisfied; defer to a full build.
    #[error("{0}")]
    MustRebuild(String),

    #[error(transparent)]
    Insertion(#[from] InsertionError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Top-level build failure, as seen by the driver.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Insertion(#[from] InsertionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<QuickBuildError> for BuildError {
    fn from(error: QuickBuildError) -> Self {
        match error {
            // Callers fold MustRebuild into an outcome before converting;
            // a stray one is surfaced as a plain insertion failure.
            QuickBuildError::MustRebuild(reason) => {
                BuildError::Insertion(InsertionError::Failed(reason))
            }
            QuickBuildError::Insertion(e) => BuildError::Insertion(e),
            QuickBuildError::Report(e) => BuildError::Report(e),
            QuickBuildError::Io(e) => BuildError::Io(e),
        }
    }
}
