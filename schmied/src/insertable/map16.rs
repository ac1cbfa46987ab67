//! Map16 tile data insertion.
//!
//! Binary map16 goes straight into the editor's import. The textual form is
//! converted to the binary layout by a user-configured converter tool first,
//! then imported the same way.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Command;

use tracing::info;

use crate::config::Configuration;
use crate::dependency::{ConfigurationDependency, Policy, ResourceDependency};
use crate::descriptor::Symbol;
use crate::error::InsertionError;
use crate::paths;

use super::{folder_dependencies, run_tool, Insertable};

const CONVERTER_TOOL: &str = "text-map16";

pub struct Map16Step {
    kind: Symbol,
    editor: PathBuf,
    rom: PathBuf,
    source: PathBuf,
    converter: Option<(PathBuf, Vec<String>)>,
    converted_target: PathBuf,
    config_deps: HashSet<ConfigurationDependency>,
}

impl Map16Step {
    pub fn new(kind: Symbol, config: &Configuration) -> Result<Self, InsertionError> {
        let root = &config.project_root;
        let mut config_deps = HashSet::from([ConfigurationDependency::new(
            "editor",
            Policy::Reinsert,
            config.get_by_key("editor"),
        )]);

        let (source, converter) = match kind {
            Symbol::BinaryMap16 => (root.join("all.map16"), None),
            Symbol::TextMap16 => {
                let tool = config.tools.get(CONVERTER_TOOL).ok_or_else(|| {
                    InsertionError::ToolNotFound(format!(
                        "text map16 requires a configured '{CONVERTER_TOOL}' tool"
                    ))
                })?;
                let executable = if tool.executable.is_absolute() {
                    tool.executable.clone()
                } else {
                    root.join(&tool.executable)
                };
                let key = format!("tools.{CONVERTER_TOOL}.executable");
                let recorded = config.get_by_key(&key);
                let _ = config_deps.insert(ConfigurationDependency::new(
                    key,
                    Policy::Reinsert,
                    recorded,
                ));
                (
                    root.join("map16"),
                    Some((executable, tool.options.clone())),
                )
            }
            other => {
                return Err(InsertionError::Failed(format!(
                    "{other:?} is not a map16 step"
                )))
            }
        };

        Ok(Self {
            kind,
            editor: config.editor.clone(),
            rom: paths::temporary_rom(&config.temporary_folder, &config.output_rom),
            converted_target: config.temporary_folder.join("all.map16"),
            source,
            converter,
            config_deps,
        })
    }
}

impl Insertable for Map16Step {
    fn init(&mut self) -> Result<(), InsertionError> {
        if !self.source.exists() {
            return Err(InsertionError::ResourceNotFound(format!(
                "map16 source not found at '{}'",
                self.source.display()
            )));
        }
        Ok(())
    }

    fn insert(&mut self) -> Result<(), InsertionError> {
        let import_source = match &self.converter {
            None => self.source.clone(),
            Some((executable, options)) => {
                info!("Converting text map16 from '{}'", self.source.display());
                run_tool(
                    "map16 converter",
                    Command::new(executable)
                        .args(options)
                        .arg(&self.source)
                        .arg(&self.converted_target),
                )?;
                self.converted_target.clone()
            }
        };

        info!("Inserting {:?}", self.kind);
        run_tool(
            "editor -ImportAllMap16",
            Command::new(&self.editor)
                .arg("-ImportAllMap16")
                .arg(&self.rom)
                .arg(&import_source),
        )
    }

    fn insert_with_dependency_report(
        &mut self,
    ) -> Result<HashSet<ResourceDependency>, InsertionError> {
        self.insert()?;

        let mut dependencies = if self.converter.is_some() {
            folder_dependencies(&self.source, Policy::Reinsert)
        } else {
            HashSet::from([ResourceDependency::observed(&self.source, Policy::Reinsert)])
        };
        if let Some((executable, _)) = &self.converter {
            let _ = dependencies.insert(ResourceDependency::observed(executable, Policy::Reinsert));
        }
        let _ = dependencies.insert(ResourceDependency::observed(&self.editor, Policy::Reinsert));
        Ok(dependencies)
    }

    fn configuration_dependencies(&self) -> HashSet<ConfigurationDependency> {
        self.config_deps.clone()
    }
}
