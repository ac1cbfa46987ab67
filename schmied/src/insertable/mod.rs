//! The insertable contract and the production step factory.
//!
//! Every build step applies a side effect to the working ROM by driving an
//! external tool, then tells the engine which files and configuration values
//! it consumed. The engine never looks inside a step; it only replays the
//! recorded dependency sets against the current project state on the next
//! run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use convenient_asar::AsarCli;

use crate::config::Configuration;
use crate::dependency::{ConfigurationDependency, ResourceDependency};
use crate::descriptor::{Descriptor, Symbol};
use crate::error::InsertionError;

pub mod editor;
pub mod external_tool;
pub mod levels;
pub mod map16;
pub mod module;
pub mod patch;

pub use editor::EditorStep;
pub use external_tool::ExternalTool;
pub use levels::LevelsStep;
pub use map16::Map16Step;
pub use module::Module;
pub use patch::Patch;

/// One build step.
///
/// `insert_with_dependency_report` performs the same side effect as `insert`
/// and additionally returns the resource dependencies actually consumed. A
/// step that cannot produce a report performs the side effect and then fails
/// with [`InsertionError::NoDependencyReport`]; the engine treats that as an
/// opt-out, not a hard failure.
pub trait Insertable {
    /// Idempotent preflight: tools present, inputs present.
    fn init(&mut self) -> Result<(), InsertionError>;

    /// Apply the side effect to the working ROM.
    fn insert(&mut self) -> Result<(), InsertionError>;

    /// Apply the side effect and report the consumed resources.
    fn insert_with_dependency_report(
        &mut self,
    ) -> Result<HashSet<ResourceDependency>, InsertionError>;

    /// Configuration keys whose values this step consumed during this run.
    fn configuration_dependencies(&self) -> HashSet<ConfigurationDependency>;

    /// Address ranges written by the last `insert`. Only patches report
    /// these.
    fn hijacks(&self) -> Option<&[(usize, usize)]> {
        None
    }

    /// Output files emitted by the last `insert`, relative to the module
    /// output directory. Only modules report these.
    fn emitted_outputs(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Constructs insertables from descriptors. The engine goes through this
/// seam so tests can substitute scripted steps.
pub trait InsertableFactory {
    fn create(
        &self,
        descriptor: &Descriptor,
        config: &Configuration,
    ) -> Result<Box<dyn Insertable>, InsertionError>;
}

/// Production factory wiring the external editor, the assembler and the
/// user-configured tools.
pub struct ToolFactory;

impl InsertableFactory for ToolFactory {
    fn create(
        &self,
        descriptor: &Descriptor,
        config: &Configuration,
    ) -> Result<Box<dyn Insertable>, InsertionError> {
        match descriptor.symbol {
            Symbol::Graphics
            | Symbol::ExGraphics
            | Symbol::SharedPalettes
            | Symbol::Overworld
            | Symbol::TitleScreen
            | Symbol::Credits
            | Symbol::GlobalExAnimation
            | Symbol::TitleMoves => Ok(Box::new(EditorStep::new(descriptor.symbol, config)?)),
            Symbol::Levels => Ok(Box::new(LevelsStep::new(config)?)),
            Symbol::BinaryMap16 | Symbol::TextMap16 => {
                Ok(Box::new(Map16Step::new(descriptor.symbol, config)?))
            }
            Symbol::ExternalTool => {
                let name = descriptor.name.as_deref().ok_or_else(|| {
                    InsertionError::Failed("external tool step is missing its name".into())
                })?;
                Ok(Box::new(ExternalTool::new(name, config)?))
            }
            Symbol::Pixi => Ok(Box::new(ExternalTool::new("pixi", config)?)),
            Symbol::Patch => {
                let path = descriptor.path.as_deref().ok_or_else(|| {
                    InsertionError::Failed("patch step is missing its source path".into())
                })?;
                let assembler = Box::new(AsarCli::new(&config.assembler));
                Ok(Box::new(Patch::new(path, config, assembler)))
            }
            Symbol::Module => {
                let path = descriptor.path.as_deref().ok_or_else(|| {
                    InsertionError::Failed("module step is missing its source path".into())
                })?;
                let assembler = Box::new(AsarCli::new(&config.assembler));
                Ok(Box::new(Module::new(path, config, assembler)))
            }
        }
    }
}

/// Run an external command to completion, mapping a missing executable to a
/// preflight error and a nonzero exit to an insertion failure.
pub(crate) fn run_tool(what: &str, command: &mut Command) -> Result<(), InsertionError> {
    let output = command.output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            InsertionError::ToolNotFound(what.to_string())
        } else {
            InsertionError::Io(e)
        }
    })?;

    if output.status.success() {
        Ok(())
    } else {
        let mut detail = String::from_utf8_lossy(&output.stderr).into_owned();
        if detail.trim().is_empty() {
            detail = String::from_utf8_lossy(&output.stdout).into_owned();
        }
        Err(InsertionError::Failed(format!(
            "{} failed with exit code {}:\n{}",
            what,
            output.status.code().unwrap_or(-1),
            detail.trim_end()
        )))
    }
}

/// Observe every file under `dir` as a resource dependency.
pub(crate) fn folder_dependencies(
    dir: &Path,
    policy: crate::dependency::Policy,
) -> HashSet<ResourceDependency> {
    crate::fsutil::files_under(dir)
        .into_iter()
        .map(|path| ResourceDependency::observed(path, policy))
        .collect()
}
