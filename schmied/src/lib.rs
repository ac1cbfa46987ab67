//! Schmied - incremental build driver for ROM hacking projects
//!
//! Schmied composes many independent insertable artifacts (graphics banks,
//! overworld data, level files, assembly patches, tool outputs, code
//! modules) into a single output ROM by driving external editors and
//! assemblers against a shared working image. Its core is the quick-build
//! engine: on every invocation it decides, from the recorded state of the
//! last full build, the minimum set of steps that must re-run to produce a
//! ROM equivalent to a clean build, and refuses to skip work whenever that
//! equivalence cannot be proven.
//!
//! ## Architecture
//!
//! 1. **Dependency model**: [`descriptor`], [`dependency`] - step identity
//!    and recorded file/configuration dependencies with change policies
//! 2. **Persistence**: [`report`] - the build report written after a full
//!    build and consumed by quick builds
//! 3. **Steps**: [`insertable`] - the contract every build step satisfies,
//!    plus the wrappers driving the external tools
//! 4. **Engines**: [`builders`] - the full builder and the quick-build
//!    decision procedure with module cleanup

pub mod builders;
pub mod config;
pub mod dependency;
pub mod descriptor;
pub mod error;
pub mod fsutil;
pub mod insertable;
pub mod levels;
pub mod paths;
pub mod report;
pub mod rom;

pub use builders::Outcome;
pub use config::Configuration;
pub use dependency::{ConfigurationDependency, Policy, ResourceDependency};
pub use descriptor::{Descriptor, Symbol};
pub use error::{BuildError, InsertionError, QuickBuildError};
pub use insertable::{Insertable, InsertableFactory, ToolFactory};
pub use report::{BuildReport, DependencyEntry, BUILD_REPORT_FORMAT_VERSION};
