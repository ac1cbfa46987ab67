//! The quick-build decision engine.
//!
//! Given the report of the last successful build, the engine proves that
//! reusing the previous output ROM plus a minimal set of re-insertions is
//! equivalent to rebuilding from scratch. Every precondition failure turns
//! into a `MustRebuild` signal for the caller; the engine refuses to skip
//! work it cannot prove safe.
//!
//! The whole procedure is single-threaded and order-preserving: steps
//! consume artifacts of earlier steps through the shared working ROM, so the
//! recorded build order is replayed exactly.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;

use convenient_asar::PatchAssembler;
use tracing::{info, warn};

use crate::config::Configuration;
use crate::dependency::{mtime_token, ConfigurationDependency, Policy, ResourceDependency};
use crate::descriptor::Symbol;
use crate::error::{InsertionError, QuickBuildError};
use crate::fsutil;
use crate::insertable::InsertableFactory;
use crate::levels;
use crate::paths;
use crate::report::{BuildReport, BUILD_REPORT_FORMAT_VERSION};
use crate::rom;

use super::{cleanup, common, Outcome};

/// Run the quick-build decision procedure. `MustRebuild` is folded into the
/// returned [`Outcome`]; only genuine failures surface as errors.
pub fn run(
    config: &Configuration,
    factory: &dyn InsertableFactory,
    assembler: &mut dyn PatchAssembler,
) -> Result<Outcome, crate::error::BuildError> {
    let attempt = QuickBuilder::new(config).and_then(|mut builder| {
        builder.build(config, factory, assembler)
    });
    match attempt {
        Ok(outcome) => Ok(outcome),
        Err(QuickBuildError::MustRebuild(reason)) => Ok(Outcome::MustRebuild(reason)),
        Err(other) => Err(other.into()),
    }
}

pub struct QuickBuilder {
    report: BuildReport,
    report_path: PathBuf,
}

impl QuickBuilder {
    pub fn new(config: &Configuration) -> Result<Self, QuickBuildError> {
        let report_path = paths::build_report(&config.project_root);
        if !report_path.exists() {
            return Err(QuickBuildError::MustRebuild(format!(
                "No build report found at '{}', must rebuild",
                report_path.display()
            )));
        }
        let report = BuildReport::load(&report_path)?;
        Ok(Self {
            report,
            report_path,
        })
    }

    pub fn build(
        &mut self,
        config: &Configuration,
        factory: &dyn InsertableFactory,
        assembler: &mut dyn PatchAssembler,
    ) -> Result<Outcome, QuickBuildError> {
        info!("Quick build started");

        info!("Checking whether ROM from previous build exists");
        if !config.output_rom.exists() {
            return Err(QuickBuildError::MustRebuild(format!(
                "No ROM found at '{}', must rebuild",
                config.output_rom.display()
            )));
        }

        info!("Checking whether configured ROM size has changed");
        self.check_rom_size(config)?;

        info!("Checking whether build report format has changed");
        self.check_report_format()?;

        info!("Checking whether build order has changed");
        self.check_build_order(config)?;

        if config.levels.is_some() {
            info!("Checking whether level files have been removed since last build");
            self.check_level_removals(config)?;
        }

        info!("Checking whether any configuration changes require a rebuild");
        self.check_rebuild_config_dependencies(config)?;

        let temporary_rom = paths::temporary_rom(&config.temporary_folder, &config.output_rom);
        let mut any_work_done = false;
        let mut failed_dependency_report: Option<String> = None;
        let mut module_outputs = self.report.module_outputs.clone();

        for index in 0..self.report.dependencies.len() {
            // A rebuild-policy resource that changed anywhere at or after
            // this position must abort before any further mutation.
            self.check_rebuild_resource_dependencies(index)?;

            let descriptor = self.report.dependencies[index].descriptor.clone();
            let reinsert_reason = self.reinsert_reason(index, config);

            let Some(reason) = reinsert_reason else {
                if descriptor.symbol == Symbol::Module {
                    let name = module_name(&descriptor)?;
                    restore_module_outputs(&name, &module_outputs, config)?;
                }
                info!("{} already up to date", descriptor);
                continue;
            };

            info!("{} must be reinserted due to {}", descriptor, reason);

            if !any_work_done {
                any_work_done = true;
                std::fs::create_dir_all(&config.temporary_folder)?;
                let _ = std::fs::copy(&config.output_rom, &temporary_rom)?;
            }

            if descriptor.symbol == Symbol::Module {
                let source = module_source(&descriptor, config)?;
                cleanup::clean_module(&source, &temporary_rom, &config.project_root, assembler)?;
            }

            let mut insertable = factory.create(&descriptor, config)?;
            insertable.init()?;

            if failed_dependency_report.is_none() {
                match insertable.insert_with_dependency_report() {
                    Ok(resource_dependencies) => {
                        let entry = &mut self.report.dependencies[index];
                        entry.configuration_dependencies =
                            sorted_config_deps(insertable.configuration_dependencies());
                        entry.resource_dependencies =
                            sorted_resource_deps(resource_dependencies);
                    }
                    Err(InsertionError::NoDependencyReport(what)) => {
                        failed_dependency_report = Some(what);
                    }
                    Err(other) => return Err(other.into()),
                }
            } else {
                insertable.insert()?;
            }

            if descriptor.symbol == Symbol::Patch {
                let old_hijacks = self.report.dependencies[index]
                    .hijacks
                    .clone()
                    .unwrap_or_default();
                let new_hijacks = insertable
                    .hijacks()
                    .map(<[(usize, usize)]>::to_vec)
                    .unwrap_or_default();
                if hijacks_gone_bad(&old_hijacks, &new_hijacks) {
                    return Err(QuickBuildError::MustRebuild(format!(
                        "Hijacks of {} have changed, must rebuild",
                        descriptor
                    )));
                }
                self.report.dependencies[index].hijacks = Some(new_hijacks);
            }

            if descriptor.symbol == Symbol::Module {
                let name = module_name(&descriptor)?;
                let _ = module_outputs.insert(name, insertable.emitted_outputs());
            }
        }

        if !any_work_done {
            info!("Everything already up to date, nothing to do");
            return Ok(Outcome::NoWork);
        }

        match &failed_dependency_report {
            None => {
                let updated = self.create_updated_report(config, module_outputs)?;
                updated.save(&self.report_path)?;
            }
            Some(what) => {
                warn!(
                    "{}; the new dependency report is incomplete, so the next build will be a full rebuild",
                    what
                );
                BuildReport::delete(&self.report_path)?;
            }
        }

        common::cache_module_outputs(&config.project_root, &config.module_output)?;
        rom::write_marker(&temporary_rom)?;
        common::move_temp_to_output(&temporary_rom, &config.output_rom)?;
        common::link_output_rom_to_graphics(config)?;
        fsutil::remove_dir_if_exists(&config.temporary_folder)?;

        info!("Quick build finished successfully");
        Ok(Outcome::Success)
    }

    fn check_rom_size(&self, config: &Configuration) -> Result<(), QuickBuildError> {
        if self.report.rom_size != config.rom_size {
            return Err(QuickBuildError::MustRebuild(
                "Configured ROM size has changed, must rebuild".into(),
            ));
        }
        Ok(())
    }

    fn check_report_format(&self) -> Result<(), QuickBuildError> {
        if self.report.file_format_version != BUILD_REPORT_FORMAT_VERSION {
            return Err(QuickBuildError::MustRebuild(
                "Build report format has changed, must rebuild".into(),
            ));
        }
        Ok(())
    }

    fn check_build_order(&self, config: &Configuration) -> Result<(), QuickBuildError> {
        let changed = self.report.build_order.len() != config.build_order.len()
            || self
                .report
                .build_order
                .iter()
                .zip(&config.build_order)
                .any(|(old, new)| old != new);
        if changed {
            return Err(QuickBuildError::MustRebuild(
                "Build order has changed, must rebuild".into(),
            ));
        }
        Ok(())
    }

    fn check_level_removals(&self, config: &Configuration) -> Result<(), QuickBuildError> {
        let Some(levels_dir) = &config.levels else {
            return Ok(());
        };

        if !levels_dir.exists() {
            if self.report.inserted_levels.is_empty() {
                return Ok(());
            }
            return Err(InsertionError::Failed(format!(
                "Configured levels folder at '{}' does not exist, but levels were previously \
                 inserted into this ROM, aborting build for safety; if you no longer wish to \
                 insert levels, unset the 'levels' path in your configuration",
                levels_dir.display()
            ))
            .into());
        }

        let current = levels::current_level_numbers(levels_dir)?;
        let removed = self
            .report
            .inserted_levels
            .iter()
            .filter(|number| !current.contains(*number))
            .count();

        if removed != 0 {
            return Err(QuickBuildError::MustRebuild(format!(
                "{} old level file{} {} been removed, must rebuild",
                removed,
                if removed > 1 { "s" } else { "" },
                if removed > 1 { "have" } else { "has" }
            )));
        }
        Ok(())
    }

    fn check_rebuild_config_dependencies(
        &self,
        config: &Configuration,
    ) -> Result<(), QuickBuildError> {
        for entry in &self.report.dependencies {
            for dependency in &entry.configuration_dependencies {
                if dependency.policy != Policy::Rebuild {
                    continue;
                }
                let current = config.get_by_key(&dependency.config_key_path);
                if current != dependency.recorded_value {
                    return Err(QuickBuildError::MustRebuild(format!(
                        "Value of {} has changed, must rebuild",
                        dependency.config_key_path
                    )));
                }
            }
        }
        Ok(())
    }

    /// Sweep rebuild-policy resource dependencies of all entries at or
    /// after `starting_index`.
    fn check_rebuild_resource_dependencies(
        &self,
        starting_index: usize,
    ) -> Result<(), QuickBuildError> {
        for entry in &self.report.dependencies[starting_index..] {
            for dependency in &entry.resource_dependencies {
                if dependency.policy != Policy::Rebuild {
                    continue;
                }
                if mtime_token(&dependency.path) != dependency.last_write_time {
                    return Err(QuickBuildError::MustRebuild(format!(
                        "Dependency '{}' of {} has changed, must rebuild",
                        dependency.path.display(),
                        entry.descriptor
                    )));
                }
            }
        }
        Ok(())
    }

    /// Why the step at `index` must be re-inserted, if it must. Changed
    /// reinsert-policy configuration values take precedence over changed
    /// resources in the reported reason.
    fn reinsert_reason(&self, index: usize, config: &Configuration) -> Option<String> {
        let entry = &self.report.dependencies[index];

        for dependency in &entry.configuration_dependencies {
            if dependency.policy != Policy::Reinsert {
                continue;
            }
            if config.get_by_key(&dependency.config_key_path) != dependency.recorded_value {
                return Some(format!(
                    "change in configuration variable {}",
                    dependency.config_key_path
                ));
            }
        }

        for dependency in &entry.resource_dependencies {
            if dependency.policy != Policy::Reinsert {
                continue;
            }
            if mtime_token(&dependency.path) != dependency.last_write_time {
                return Some(format!("change in resource '{}'", dependency.path.display()));
            }
        }

        None
    }

    fn create_updated_report(
        &self,
        config: &Configuration,
        module_outputs: BTreeMap<String, Vec<PathBuf>>,
    ) -> Result<BuildReport, QuickBuildError> {
        let inserted_levels = match &config.levels {
            Some(dir) if dir.is_dir() => levels::current_level_numbers(dir)?,
            _ => BTreeSet::new(),
        };

        Ok(BuildReport {
            file_format_version: BUILD_REPORT_FORMAT_VERSION,
            rom_size: config.rom_size,
            build_order: config.build_order.clone(),
            inserted_levels,
            module_outputs,
            dependencies: self.report.dependencies.clone(),
        })
    }
}

/// Whether re-inserted hijacks no longer cover bytes the old hijacks owned.
/// Growth is fine; shrinkage leaves stale bytes behind and is not.
pub fn hijacks_gone_bad(old: &[(usize, usize)], new: &[(usize, usize)]) -> bool {
    let mut new_written = HashSet::new();
    for (address, length) in new {
        for offset in 0..*length {
            let _ = new_written.insert(address + offset);
        }
    }

    old.iter().any(|(address, length)| {
        (0..*length).any(|offset| !new_written.contains(&(address + offset)))
    })
}

fn module_name(descriptor: &crate::descriptor::Descriptor) -> Result<String, QuickBuildError> {
    descriptor.name.clone().ok_or_else(|| {
        QuickBuildError::Insertion(InsertionError::Failed(
            "module step is missing its name".into(),
        ))
    })
}

fn module_source(
    descriptor: &crate::descriptor::Descriptor,
    config: &Configuration,
) -> Result<PathBuf, QuickBuildError> {
    let path = descriptor.path.clone().ok_or_else(|| {
        QuickBuildError::Insertion(InsertionError::Failed(
            "module step is missing its source path".into(),
        ))
    })?;
    Ok(if path.is_absolute() {
        path
    } else {
        config.project_root.join(path)
    })
}

/// Re-emit an unchanged module's output files from the old-symbols cache.
/// The previous output ROM already contains the module's code; only the
/// on-disk outputs need resurrecting.
fn restore_module_outputs(
    name: &str,
    module_outputs: &BTreeMap<String, Vec<PathBuf>>,
    config: &Configuration,
) -> Result<(), QuickBuildError> {
    let Some(outputs) = module_outputs.get(name) else {
        return Err(QuickBuildError::MustRebuild(format!(
            "No recorded outputs for module '{}', must rebuild",
            name
        )));
    };

    let cache = paths::module_old_symbols_dir(&config.project_root);
    for relative in outputs {
        let source = cache.join(relative);
        if !source.exists() {
            return Err(QuickBuildError::MustRebuild(format!(
                "Previously created module output '{}' is missing, must rebuild",
                source.display()
            )));
        }
        let target = config.module_output.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _ = std::fs::copy(&source, &target)?;
    }
    Ok(())
}

fn sorted_config_deps(deps: HashSet<ConfigurationDependency>) -> Vec<ConfigurationDependency> {
    let mut deps: Vec<_> = deps.into_iter().collect();
    deps.sort_by(|a, b| a.config_key_path.cmp(&b.config_key_path));
    deps
}

fn sorted_resource_deps(deps: HashSet<ResourceDependency>) -> Vec<ResourceDependency> {
    let mut deps: Vec<_> = deps.into_iter().collect();
    deps.sort_by(|a, b| a.path.cmp(&b.path));
    deps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_hijacks_are_fine() {
        let hijacks = vec![(0x0F_8000, 16)];
        assert!(!hijacks_gone_bad(&hijacks, &hijacks));
    }

    #[test]
    fn hijack_growth_is_fine() {
        let old = vec![(0x0F_8000, 16)];
        let new = vec![(0x0F_8000, 32), (0x10_0000, 4)];
        assert!(!hijacks_gone_bad(&old, &new));
    }

    #[test]
    fn hijack_shrinkage_goes_bad() {
        let old = vec![(0x0F_8000, 16)];
        let new = vec![(0x0F_8000, 8)];
        assert!(hijacks_gone_bad(&old, &new));
    }

    #[test]
    fn moved_hijack_goes_bad_even_with_equal_total_size() {
        let old = vec![(0x0F_8000, 16)];
        let new = vec![(0x0F_9000, 16)];
        assert!(hijacks_gone_bad(&old, &new));
    }

    #[test]
    fn empty_old_set_is_always_covered() {
        assert!(!hijacks_gone_bad(&[], &[(0x10, 4)]));
        assert!(!hijacks_gone_bad(&[], &[]));
    }

    #[test]
    fn regrouped_but_covering_hijacks_are_fine() {
        let old = vec![(0x100, 8)];
        let new = vec![(0x100, 4), (0x104, 4)];
        assert!(!hijacks_gone_bad(&old, &new));
    }
}
