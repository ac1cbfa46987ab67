//! Code module insertion.
//!
//! A module is a code blob the assembler places at addresses of its own
//! choosing. Besides patching the working ROM, inserting a module leaves two
//! artifacts behind: a cleanup sidecar recording the addresses its code
//! landed at (consumed by module cleanup before the next re-assembly), and a
//! placement manifest in the module output directory that other builds can
//! resurrect from the old-symbols cache without re-running the assembler.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use convenient_asar::{PatchAssembler, PatchParams};
use tracing::{debug, info};

use crate::config::Configuration;
use crate::dependency::{ConfigurationDependency, Policy, ResourceDependency};
use crate::error::InsertionError;
use crate::paths;
use crate::rom;

use super::patch::scan_includes;
use super::Insertable;

pub struct Module {
    source: PathBuf,
    rom: PathBuf,
    assembler: Box<dyn PatchAssembler>,
    project_root: PathBuf,
    module_output: PathBuf,
    emitted: Vec<PathBuf>,
    config_deps: HashSet<ConfigurationDependency>,
}

impl Module {
    pub fn new(
        source: &Path,
        config: &Configuration,
        assembler: Box<dyn PatchAssembler>,
    ) -> Self {
        let source = if source.is_absolute() {
            source.to_path_buf()
        } else {
            config.project_root.join(source)
        };

        let config_deps = HashSet::from([ConfigurationDependency::new(
            "assembler",
            Policy::Reinsert,
            config.get_by_key("assembler"),
        )]);

        Self {
            source,
            rom: paths::temporary_rom(&config.temporary_folder, &config.output_rom),
            assembler,
            project_root: config.project_root.clone(),
            module_output: config.module_output.clone(),
            emitted: Vec::new(),
            config_deps,
        }
    }

    /// Path of the placement manifest relative to the module output
    /// directory.
    fn output_relative(&self) -> PathBuf {
        let relative = self
            .source
            .strip_prefix(&self.project_root)
            .unwrap_or(&self.source);
        relative.with_extension("sym")
    }

    fn write_cleanup_sidecar(&self, blocks: &[(usize, usize)]) -> Result<(), InsertionError> {
        let sidecar = paths::module_cleanup_file(&self.project_root, &self.source);
        if let Some(parent) = sidecar.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&sidecar)?;
        for (address, _) in blocks {
            writeln!(file, "{address}")?;
        }
        debug!(
            "Recorded {} cleanup address(es) for '{}'",
            blocks.len(),
            self.source.display()
        );
        Ok(())
    }

    fn write_placement_manifest(&self, blocks: &[(usize, usize)]) -> Result<PathBuf, InsertionError> {
        let relative = self.output_relative();
        let target = self.module_output.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&target)?;
        for (address, length) in blocks {
            writeln!(file, "{address:06X} {length:X}")?;
        }
        Ok(relative)
    }
}

impl Insertable for Module {
    fn init(&mut self) -> Result<(), InsertionError> {
        self.assembler.init()?;
        if !self.source.exists() {
            return Err(InsertionError::ResourceNotFound(format!(
                "module source not found at '{}'",
                self.source.display()
            )));
        }
        Ok(())
    }

    fn insert(&mut self) -> Result<(), InsertionError> {
        info!("Assembling module '{}'", self.source.display());

        let image = std::fs::read(&self.rom)?;
        let (header, body) = rom::split_header(&image);
        let header = header.to_vec();
        let mut body = body.to_vec();

        let report = self.assembler.patch(PatchParams {
            patch_path: &self.source,
            rom: &mut body,
            max_rom_size: rom::MAX_ROM_SIZE,
        })?;

        let mut image = header;
        image.extend_from_slice(&body);
        std::fs::write(&self.rom, image)?;

        self.write_cleanup_sidecar(&report.written_blocks)?;
        let manifest = self.write_placement_manifest(&report.written_blocks)?;
        self.emitted = vec![manifest];
        Ok(())
    }

    fn insert_with_dependency_report(
        &mut self,
    ) -> Result<HashSet<ResourceDependency>, InsertionError> {
        self.insert()?;

        let mut dependencies =
            HashSet::from([ResourceDependency::observed(&self.source, Policy::Reinsert)]);
        for include in scan_includes(&self.source) {
            let _ = dependencies.insert(ResourceDependency::observed(include, Policy::Reinsert));
        }
        Ok(dependencies)
    }

    fn configuration_dependencies(&self) -> HashSet<ConfigurationDependency> {
        self.config_deps.clone()
    }

    fn emitted_outputs(&self) -> Vec<PathBuf> {
        self.emitted.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convenient_asar::{AsarResult, PatchReport};

    struct StubAssembler {
        blocks: Vec<(usize, usize)>,
    }

    impl PatchAssembler for StubAssembler {
        fn init(&mut self) -> AsarResult<()> {
            Ok(())
        }

        fn patch(&mut self, params: PatchParams<'_>) -> AsarResult<PatchReport> {
            for (address, length) in &self.blocks {
                for offset in *address..*address + *length {
                    if offset < params.rom.len() {
                        params.rom[offset] = 0xEA;
                    }
                }
            }
            Ok(PatchReport {
                written_blocks: self.blocks.clone(),
            })
        }
    }

    fn config(root: &Path) -> Configuration {
        let manifest = r#"
base_rom: clean.sfc
output_rom: out/hack.sfc
temporary_folder: .tmp
build_order: ["module:modules/m.asm"]
"#;
        Configuration::from_str(manifest, root).unwrap()
    }

    #[test]
    fn insertion_leaves_sidecar_and_manifest_behind() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("modules")).unwrap();
        std::fs::create_dir_all(root.join(".tmp")).unwrap();
        std::fs::write(root.join("modules/m.asm"), "org $008000\nrts\n").unwrap();
        std::fs::write(root.join(".tmp/hack.sfc"), vec![0u8; 0x8000]).unwrap();

        let config = config(root);
        let assembler = Box::new(StubAssembler {
            blocks: vec![(0x1000, 4), (0x2000, 2)],
        });
        let mut module = Module::new(Path::new("modules/m.asm"), &config, assembler);
        module.init().unwrap();
        module.insert().unwrap();

        let sidecar = root.join(".schmied/cleanup/modules/m.addr");
        let addresses = std::fs::read_to_string(sidecar).unwrap();
        assert_eq!(addresses, "4096\n8192\n");

        assert_eq!(module.emitted_outputs(), vec![PathBuf::from("modules/m.sym")]);
        let manifest = root.join("module_output/modules/m.sym");
        assert!(manifest.exists());

        let image = std::fs::read(root.join(".tmp/hack.sfc")).unwrap();
        assert_eq!(image[0x1000], 0xEA);
    }
}
