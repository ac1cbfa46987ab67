//! Build report persistence.
//!
//! The report is the record of the last successful full build: the order the
//! steps ran in, the dependency sets each step consumed, and the side-effect
//! metadata (patch hijacks, module outputs) that the quick builder needs to
//! prove a previous ROM equivalent to a clean rebuild. It is written at the
//! end of a successful build and deleted whenever its state would otherwise
//! become inconsistent, forcing a rebuild next time.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dependency::{ConfigurationDependency, ResourceDependency};
use crate::descriptor::Descriptor;
use crate::error::ReportError;

/// Compile-time report format version. Any mismatch invalidates the whole
/// report.
pub const BUILD_REPORT_FORMAT_VERSION: u32 = 3;

/// One step's recorded dependency sets. `hijacks` is present exactly for
/// PATCH entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEntry {
    pub descriptor: Descriptor,
    pub configuration_dependencies: Vec<ConfigurationDependency>,
    pub resource_dependencies: Vec<ResourceDependency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hijacks: Option<Vec<(usize, usize)>>,
}

/// Persisted record of the last successful build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub file_format_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rom_size: Option<u64>,
    pub build_order: Vec<Descriptor>,
    /// Source level numbers inserted at the last build.
    pub inserted_levels: BTreeSet<u16>,
    /// Per-module output files, relative to the module output directory.
    pub module_outputs: BTreeMap<String, Vec<PathBuf>>,
    pub dependencies: Vec<DependencyEntry>,
}

impl BuildReport {
    pub fn load(path: &Path) -> Result<Self, ReportError> {
        let text = std::fs::read_to_string(path).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ReportError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ReportError> {
        let io_error = |source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| ReportError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, text).map_err(io_error)?;
        debug!("Wrote build report to '{}'", path.display());
        Ok(())
    }

    /// Remove the report file if it exists.
    pub fn delete(path: &Path) -> Result<(), ReportError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ReportError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}
