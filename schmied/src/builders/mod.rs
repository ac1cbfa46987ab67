//! Build orchestration: the full builder and the quick-build decision
//! engine.

pub mod cleanup;
pub mod common;
pub mod full;
pub mod quick;

/// Result of a quick-build attempt.
///
/// `MustRebuild` is ordinary control flow: the premises for skipping work
/// could not be proven, and the caller is expected to fall through to a full
/// build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Work was performed and the output ROM was replaced.
    Success,
    /// Everything was already up to date; nothing was touched.
    NoWork,
    /// The quick path is unsafe; a full rebuild is required.
    MustRebuild(String),
}
