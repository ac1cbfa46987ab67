//! Level insertion through the external editor's multi-level import.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Command;

use tracing::info;

use crate::config::Configuration;
use crate::dependency::{ConfigurationDependency, Policy, ResourceDependency};
use crate::error::InsertionError;
use crate::levels;
use crate::paths;

use super::{run_tool, Insertable};

pub struct LevelsStep {
    editor: PathBuf,
    rom: PathBuf,
    levels_dir: PathBuf,
    config_deps: HashSet<ConfigurationDependency>,
}

impl LevelsStep {
    pub fn new(config: &Configuration) -> Result<Self, InsertionError> {
        let levels_dir = config.levels.clone().ok_or_else(|| {
            InsertionError::ResourceNotFound(
                "levels are in the build order but no levels folder is configured".into(),
            )
        })?;

        let config_deps = HashSet::from([ConfigurationDependency::new(
            "levels",
            Policy::Reinsert,
            config.get_by_key("levels"),
        )]);

        Ok(Self {
            editor: config.editor.clone(),
            rom: paths::temporary_rom(&config.temporary_folder, &config.output_rom),
            levels_dir,
            config_deps,
        })
    }
}

impl Insertable for LevelsStep {
    fn init(&mut self) -> Result<(), InsertionError> {
        if !self.levels_dir.is_dir() {
            return Err(InsertionError::ResourceNotFound(format!(
                "levels folder not found at '{}'",
                self.levels_dir.display()
            )));
        }
        Ok(())
    }

    fn insert(&mut self) -> Result<(), InsertionError> {
        info!("Inserting levels from '{}'", self.levels_dir.display());
        run_tool(
            "editor -ImportMultLevels",
            Command::new(&self.editor)
                .arg("-ImportMultLevels")
                .arg(&self.rom)
                .arg(&self.levels_dir),
        )
    }

    fn insert_with_dependency_report(
        &mut self,
    ) -> Result<HashSet<ResourceDependency>, InsertionError> {
        self.insert()?;

        let mut dependencies: HashSet<ResourceDependency> =
            levels::enumerate_level_files(&self.levels_dir)?
                .into_iter()
                .map(|file| ResourceDependency::observed(file, Policy::Reinsert))
                .collect();
        let _ = dependencies.insert(ResourceDependency::observed(&self.editor, Policy::Reinsert));
        Ok(dependencies)
    }

    fn configuration_dependencies(&self) -> HashSet<ConfigurationDependency> {
        self.config_deps.clone()
    }
}
