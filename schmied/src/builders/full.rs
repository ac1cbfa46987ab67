//! The full builder.
//!
//! Runs every configured step in order against a fresh copy of the base
//! ROM, collects each step's dependency report and side-effect metadata,
//! and writes the build report that future quick builds decide against.
//! Optionally diffs the working ROM around each step to surface overlapping
//! writes from distinct steps.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use convenient_asar::diff_written_blocks;
use tracing::{info, warn};

use crate::config::{Configuration, ConflictPolicy};
use crate::descriptor::Symbol;
use crate::error::{BuildError, InsertionError};
use crate::fsutil;
use crate::insertable::InsertableFactory;
use crate::levels;
use crate::paths;
use crate::report::{BuildReport, DependencyEntry, BUILD_REPORT_FORMAT_VERSION};
use crate::rom;

use super::common;

pub fn run(config: &Configuration, factory: &dyn InsertableFactory) -> Result<(), BuildError> {
    info!("Full build started");

    let report_path = paths::build_report(&config.project_root);
    BuildReport::delete(&report_path)?;

    fsutil::remove_dir_if_exists(&config.temporary_folder)?;
    std::fs::create_dir_all(&config.temporary_folder)?;

    if !config.base_rom.exists() {
        return Err(InsertionError::ResourceNotFound(format!(
            "base ROM not found at '{}'",
            config.base_rom.display()
        ))
        .into());
    }

    let temporary_rom = paths::temporary_rom(&config.temporary_folder, &config.output_rom);
    let _ = std::fs::copy(&config.base_rom, &temporary_rom)?;
    expand_rom(&temporary_rom, config.rom_size)?;

    let mut tracker = ConflictTracker::new(config.conflict_policy, &temporary_rom)?;
    let mut entries = Vec::with_capacity(config.build_order.len());
    let mut module_outputs: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    let mut failed_dependency_report: Option<String> = None;

    for descriptor in &config.build_order {
        info!("Running step {}", descriptor);
        let mut insertable = factory.create(descriptor, config)?;
        insertable.init()?;

        let resource_dependencies = if failed_dependency_report.is_none() {
            match insertable.insert_with_dependency_report() {
                Ok(dependencies) => Some(dependencies),
                Err(InsertionError::NoDependencyReport(what)) => {
                    failed_dependency_report = Some(what);
                    None
                }
                Err(other) => return Err(other.into()),
            }
        } else {
            insertable.insert()?;
            None
        };

        let hijacks = (descriptor.symbol == Symbol::Patch).then(|| {
            insertable
                .hijacks()
                .map(<[(usize, usize)]>::to_vec)
                .unwrap_or_default()
        });

        if descriptor.symbol == Symbol::Module {
            if let Some(name) = &descriptor.name {
                let _ = module_outputs.insert(name.clone(), insertable.emitted_outputs());
            }
        }

        tracker.record_step(&descriptor.to_string(), hijacks.as_deref())?;

        let mut configuration_dependencies: Vec<_> = insertable
            .configuration_dependencies()
            .into_iter()
            .collect();
        configuration_dependencies.sort_by(|a, b| a.config_key_path.cmp(&b.config_key_path));

        let mut resource_dependencies: Vec<_> = resource_dependencies
            .unwrap_or_default()
            .into_iter()
            .collect();
        resource_dependencies.sort_by(|a, b| a.path.cmp(&b.path));

        entries.push(DependencyEntry {
            descriptor: descriptor.clone(),
            configuration_dependencies,
            resource_dependencies,
            hijacks,
        });
    }

    tracker.report(config)?;

    match &failed_dependency_report {
        None => {
            let inserted_levels = match &config.levels {
                Some(dir) if dir.is_dir() => levels::current_level_numbers(dir)?,
                _ => Default::default(),
            };
            let report = BuildReport {
                file_format_version: BUILD_REPORT_FORMAT_VERSION,
                rom_size: config.rom_size,
                build_order: config.build_order.clone(),
                inserted_levels,
                module_outputs,
                dependencies: entries,
            };
            report.save(&report_path)?;
        }
        Some(what) => {
            warn!(
                "{}; no build report will be written, so quick builds stay unavailable",
                what
            );
        }
    }

    common::cache_module_outputs(&config.project_root, &config.module_output)?;
    rom::write_marker(&temporary_rom)?;
    common::move_temp_to_output(&temporary_rom, &config.output_rom)?;
    common::link_output_rom_to_graphics(config)?;
    fsutil::remove_dir_if_exists(&config.temporary_folder)?;

    info!("Full build finished successfully");
    Ok(())
}

/// Pad the working image with zeroes up to the configured unheadered size.
fn expand_rom(rom_path: &Path, rom_size: Option<u64>) -> std::io::Result<()> {
    let Some(size) = rom_size else {
        return Ok(());
    };
    let image = std::fs::read(rom_path)?;
    let target = rom::header_size(image.len()) + size as usize;
    if image.len() >= target {
        return Ok(());
    }
    info!("Expanding working ROM to {} bytes", size);
    let mut image = image;
    image.resize(target, 0);
    std::fs::write(rom_path, image)
}

/// Accumulates, per file offset, which steps wrote which byte, by diffing
/// the working ROM around each step.
struct ConflictTracker {
    policy: ConflictPolicy,
    rom: PathBuf,
    previous: Vec<u8>,
    writes: BTreeMap<usize, Vec<(String, u8)>>,
}

impl ConflictTracker {
    fn new(policy: ConflictPolicy, rom: &Path) -> std::io::Result<Self> {
        let previous = if policy == ConflictPolicy::None {
            Vec::new()
        } else {
            std::fs::read(rom)?
        };
        Ok(Self {
            policy,
            rom: rom.to_path_buf(),
            previous,
            writes: BTreeMap::new(),
        })
    }

    fn record_step(
        &mut self,
        writer: &str,
        hijacks: Option<&[(usize, usize)]>,
    ) -> std::io::Result<()> {
        if self.policy == ConflictPolicy::None {
            return Ok(());
        }

        let current = std::fs::read(&self.rom)?;
        match self.policy {
            ConflictPolicy::All => {
                for (start, length) in diff_written_blocks(&self.previous, &current) {
                    self.record_range(writer, &current, start, length);
                }
            }
            ConflictPolicy::Hijacks => {
                for (start, length) in hijacks.unwrap_or_default() {
                    self.record_range(writer, &current, *start, *length);
                }
            }
            ConflictPolicy::None => {}
        }
        self.previous = current;
        Ok(())
    }

    fn record_range(&mut self, writer: &str, image: &[u8], start: usize, length: usize) {
        for offset in start..start + length {
            let Some(byte) = image.get(offset) else {
                break;
            };
            self.writes
                .entry(offset)
                .or_default()
                .push((writer.to_string(), *byte));
        }
    }

    /// Log every address range where two or more steps wrote differing
    /// bytes, and mirror the findings into the configured conflict log.
    fn report(&self, config: &Configuration) -> std::io::Result<()> {
        if self.policy == ConflictPolicy::None {
            return Ok(());
        }

        let mut conflicts: Vec<(usize, Vec<String>)> = Vec::new();
        for (offset, writes) in &self.writes {
            if writes.len() < 2 || writes_are_identical(writes) {
                continue;
            }
            let writers: Vec<String> = writes.iter().map(|(who, _)| who.clone()).collect();
            conflicts.push((*offset, writers));
        }

        if conflicts.is_empty() {
            return Ok(());
        }

        let mut log = match &config.conflict_log {
            Some(path) => Some(std::fs::File::create(path)?),
            None => None,
        };

        for (start, length, writers) in coalesce_conflicts(&conflicts) {
            let line = format!(
                "Conflict between {} at offset 0x{:06X} (length {})",
                writers.join(" and "),
                start,
                length
            );
            match &mut log {
                Some(file) => writeln!(file, "{line}")?,
                None => warn!("{line}"),
            }
        }
        if config.conflict_log.is_some() {
            warn!(
                "Write conflicts detected, see '{}'",
                config.conflict_log.as_ref().unwrap().display()
            );
        }
        Ok(())
    }
}

fn writes_are_identical(writes: &[(String, u8)]) -> bool {
    writes.windows(2).all(|pair| pair[0].1 == pair[1].1)
}

/// Merge adjacent conflicting offsets that share the same writer set into
/// `(start, length, writers)` ranges.
fn coalesce_conflicts(conflicts: &[(usize, Vec<String>)]) -> Vec<(usize, usize, Vec<String>)> {
    let mut ranges: Vec<(usize, usize, Vec<String>)> = Vec::new();
    for (offset, writers) in conflicts {
        match ranges.last_mut() {
            Some((start, length, range_writers))
                if *start + *length == *offset && range_writers == writers =>
            {
                *length += 1;
            }
            _ => ranges.push((*offset, 1, writers.clone())),
        }
    }
    ranges
}
