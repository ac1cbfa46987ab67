//! Dependency records and their change policies.
//!
//! Insertables report what they consumed during a build: files on disk and
//! configuration values. The engine never fabricates these records; it only
//! compares what was recorded against what is observed on the next run. The
//! [`Policy`] on each record controls the blast radius of a change.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

/// Blast radius of a dependency change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Policy {
    /// A difference invalidates the whole quick build.
    Rebuild,
    /// A difference re-runs only the owning step.
    Reinsert,
    /// Informational; never forces work.
    Remain,
}

/// A file on disk a step consumed, with the modification time observed when
/// the record was made. `last_write_time` is `None` iff the file did not
/// exist at that point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceDependency {
    pub path: PathBuf,
    pub policy: Policy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_write_time: Option<u64>,
}

impl ResourceDependency {
    /// Record `path` with its currently observed modification time.
    pub fn observed(path: impl Into<PathBuf>, policy: Policy) -> Self {
        let path = path.into();
        let last_write_time = mtime_token(&path);
        Self {
            path,
            policy,
            last_write_time,
        }
    }
}

/// A configuration value a step consumed, identified by the dotted path of
/// the key and recorded as its canonical stringification. `recorded_value`
/// is `None` iff the key was unset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigurationDependency {
    pub config_key_path: String,
    pub policy: Policy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_value: Option<String>,
}

impl ConfigurationDependency {
    pub fn new(
        config_key_path: impl Into<String>,
        policy: Policy,
        recorded_value: Option<String>,
    ) -> Self {
        Self {
            config_key_path: config_key_path.into(),
            policy,
            recorded_value,
        }
    }
}

/// Platform-neutral modification time token: nanoseconds since the Unix
/// epoch as a `u64`, or `None` if the file does not exist. Mtimes are the
/// source of truth for change detection; editors rewrite their files on
/// every save, so content hashing would buy nothing here.
pub fn mtime_token(path: &Path) -> Option<u64> {
    let metadata = std::fs::metadata(path).ok()?;
    let modified = metadata.modified().ok()?;
    modified
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_nanos() as u64)
}
