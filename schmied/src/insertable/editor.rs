//! Editor-driven steps.
//!
//! Graphics banks, palettes, overworld data, title screens, credits and
//! ExAnimation all go into the ROM through the external editor's command
//! line, one flag per step kind. Graphics folders are staged next to the
//! working ROM first, because the editor resolves them relative to the ROM
//! it is invoked on.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, info};

use crate::config::Configuration;
use crate::dependency::{ConfigurationDependency, Policy, ResourceDependency};
use crate::descriptor::Symbol;
use crate::error::InsertionError;
use crate::fsutil;
use crate::paths;

use super::{folder_dependencies, run_tool, Insertable};

pub struct EditorStep {
    kind: Symbol,
    editor: PathBuf,
    rom: PathBuf,
    source: PathBuf,
    flag: &'static str,
    /// Folder sources are staged next to the working ROM for the duration of
    /// the editor invocation.
    staged_folder: bool,
    config_deps: HashSet<ConfigurationDependency>,
}

impl EditorStep {
    pub fn new(kind: Symbol, config: &Configuration) -> Result<Self, InsertionError> {
        let root = &config.project_root;
        let (flag, source, staged_folder) = match kind {
            Symbol::Graphics => ("-ImportGFX", root.join("Graphics"), true),
            Symbol::ExGraphics => ("-ImportExGFX", root.join("ExGraphics"), true),
            Symbol::SharedPalettes => ("-ImportSharedPalette", root.join("shared.pal"), false),
            Symbol::Overworld => ("-TransferOverworld", root.join("overworld.sfc"), false),
            Symbol::TitleScreen => ("-TransferTitleScreen", root.join("title_screen.sfc"), false),
            Symbol::Credits => ("-TransferCredits", root.join("credits.sfc"), false),
            Symbol::GlobalExAnimation => (
                "-TransferLevelGlobalExAnim",
                root.join("global_exanimation.sfc"),
                false,
            ),
            Symbol::TitleMoves => ("-ImportTitleMoves", root.join("title_moves.zst"), false),
            other => {
                return Err(InsertionError::Failed(format!(
                    "{other:?} is not an editor-driven step"
                )))
            }
        };

        let config_deps = HashSet::from([ConfigurationDependency::new(
            "editor",
            Policy::Reinsert,
            config.get_by_key("editor"),
        )]);

        Ok(Self {
            kind,
            editor: config.editor.clone(),
            rom: paths::temporary_rom(&config.temporary_folder, &config.output_rom),
            source,
            flag,
            staged_folder,
            config_deps,
        })
    }

    fn staging_dir(&self) -> Option<PathBuf> {
        if !self.staged_folder {
            return None;
        }
        let target = self.rom.parent()?.join(self.source.file_name()?);
        (target != self.source).then_some(target)
    }
}

impl Insertable for EditorStep {
    fn init(&mut self) -> Result<(), InsertionError> {
        if !self.source.exists() {
            return Err(InsertionError::ResourceNotFound(format!(
                "{:?} source not found at '{}'",
                self.kind,
                self.source.display()
            )));
        }
        Ok(())
    }

    fn insert(&mut self) -> Result<(), InsertionError> {
        let staging = self.staging_dir();
        if let Some(target) = &staging {
            debug!(
                "Staging '{}' next to working ROM at '{}'",
                self.source.display(),
                target.display()
            );
            fsutil::copy_dir_recursive(&self.source, target)?;
        }

        info!("Inserting {:?}", self.kind);
        let mut command = Command::new(&self.editor);
        command.arg(self.flag).arg(&self.rom);
        if !self.staged_folder {
            command.arg(&self.source);
        }
        let result = run_tool(&format!("editor {}", self.flag), &mut command);

        if let Some(target) = &staging {
            if let Err(e) = fsutil::remove_dir_if_exists(target) {
                tracing::warn!("Failed to remove staged folder '{}': {}", target.display(), e);
            }
        }

        result
    }

    fn insert_with_dependency_report(
        &mut self,
    ) -> Result<HashSet<ResourceDependency>, InsertionError> {
        self.insert()?;

        let mut dependencies = if self.staged_folder {
            folder_dependencies(&self.source, Policy::Reinsert)
        } else {
            HashSet::from([ResourceDependency::observed(&self.source, Policy::Reinsert)])
        };
        let _ = dependencies.insert(ResourceDependency::observed(&self.editor, Policy::Reinsert));
        Ok(dependencies)
    }

    fn configuration_dependencies(&self) -> HashSet<ConfigurationDependency> {
        self.config_deps.clone()
    }
}
