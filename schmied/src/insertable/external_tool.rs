//! User-configured external tools (including the sprite tool).
//!
//! A tool is an arbitrary executable with options from the manifest. If it
//! declares a dependency report file, the file's newline-delimited paths are
//! read back after every run; otherwise the tool opts out of dependency
//! reporting and the engine stops collecting reports for the build.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Command;

use tracing::info;

use crate::config::Configuration;
use crate::dependency::{ConfigurationDependency, Policy, ResourceDependency};
use crate::error::InsertionError;
use crate::paths;

use super::{run_tool, Insertable};

pub struct ExternalTool {
    name: String,
    executable: PathBuf,
    options: Vec<String>,
    pass_rom: bool,
    rom: PathBuf,
    project_root: PathBuf,
    static_dependencies: Vec<PathBuf>,
    dependency_report: Option<PathBuf>,
    config_deps: HashSet<ConfigurationDependency>,
}

impl ExternalTool {
    pub fn new(name: &str, config: &Configuration) -> Result<Self, InsertionError> {
        let tool = config.tools.get(name).ok_or_else(|| {
            InsertionError::ToolNotFound(format!("tool '{name}' is not configured"))
        })?;

        let root = &config.project_root;
        let resolve = |path: &PathBuf| {
            if path.is_absolute() {
                path.clone()
            } else {
                root.join(path)
            }
        };

        let mut config_deps = HashSet::new();
        for key in ["executable", "options"] {
            let key_path = format!("tools.{name}.{key}");
            let recorded = config.get_by_key(&key_path);
            let _ = config_deps.insert(ConfigurationDependency::new(
                key_path,
                Policy::Reinsert,
                recorded,
            ));
        }

        Ok(Self {
            name: name.to_string(),
            executable: resolve(&tool.executable),
            options: tool.options.clone(),
            pass_rom: tool.pass_rom,
            rom: paths::temporary_rom(&config.temporary_folder, &config.output_rom),
            project_root: root.clone(),
            static_dependencies: tool.static_dependencies.iter().map(&resolve).collect(),
            dependency_report: tool.dependency_report.as_ref().map(resolve),
            config_deps,
        })
    }
}

impl Insertable for ExternalTool {
    fn init(&mut self) -> Result<(), InsertionError> {
        if !self.executable.exists() {
            return Err(InsertionError::ToolNotFound(format!(
                "tool '{}' executable not found at '{}'",
                self.name,
                self.executable.display()
            )));
        }
        Ok(())
    }

    fn insert(&mut self) -> Result<(), InsertionError> {
        info!("Running tool '{}'", self.name);
        let mut command = Command::new(&self.executable);
        command.args(&self.options).current_dir(&self.project_root);
        if self.pass_rom {
            command.arg(&self.rom);
        }
        run_tool(&format!("tool '{}'", self.name), &mut command)
    }

    fn insert_with_dependency_report(
        &mut self,
    ) -> Result<HashSet<ResourceDependency>, InsertionError> {
        self.insert()?;

        let Some(report_path) = &self.dependency_report else {
            return Err(InsertionError::NoDependencyReport(format!(
                "tool '{}' has no dependency report configured",
                self.name
            )));
        };

        let text = std::fs::read_to_string(report_path).map_err(|_| {
            InsertionError::NoDependencyReport(format!(
                "tool '{}' did not write its dependency report to '{}'",
                self.name,
                report_path.display()
            ))
        })?;

        let mut dependencies: HashSet<ResourceDependency> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                let path = PathBuf::from(line);
                let path = if path.is_absolute() {
                    path
                } else {
                    self.project_root.join(path)
                };
                ResourceDependency::observed(path, Policy::Reinsert)
            })
            .collect();

        for path in &self.static_dependencies {
            let _ = dependencies.insert(ResourceDependency::observed(path, Policy::Reinsert));
        }
        let _ = dependencies.insert(ResourceDependency::observed(
            &self.executable,
            Policy::Reinsert,
        ));
        Ok(dependencies)
    }

    fn configuration_dependencies(&self) -> HashSet<ConfigurationDependency> {
        self.config_deps.clone()
    }
}
