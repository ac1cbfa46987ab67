//! Module cleanup: evicting a module's previous code from the working ROM.
//!
//! Re-assembling a module without evicting its prior bytes leaks old code
//! into the ROM and can leave aliasing symbols behind. Eviction happens
//! through the patch assembler itself: a synthesised patch of one
//! `autoclean` directive per previously recorded address frees exactly the
//! blocks the module owned. The addresses come from the module's cleanup
//! sidecar; without that sidecar eviction cannot be proven complete and the
//! engine demands a rebuild.

use std::io::Write;
use std::path::Path;

use convenient_asar::{AsarError, PatchAssembler, PatchParams};
use tracing::debug;

use crate::error::{InsertionError, QuickBuildError};
use crate::paths;
use crate::rom;

/// Evict the previously inserted code of `module_source` from the working
/// ROM at `working_rom`. Atomic per module: either the ROM reflects the
/// eviction afterwards, or this returns `MustRebuild`.
pub fn clean_module(
    module_source: &Path,
    working_rom: &Path,
    project_root: &Path,
    assembler: &mut dyn PatchAssembler,
) -> Result<(), QuickBuildError> {
    let sidecar = paths::module_cleanup_file(project_root, module_source);
    if !sidecar.exists() {
        return Err(QuickBuildError::MustRebuild(format!(
            "Cannot clean module '{}' as its cleanup file is missing, must rebuild",
            module_source.display()
        )));
    }

    let addresses = read_cleanup_addresses(&sidecar)?;
    debug!(
        "Cleaning module '{}' ({} address(es))",
        module_source.display(),
        addresses.len()
    );

    let mut cleanup_patch = tempfile::Builder::new()
        .prefix("cleanup-")
        .suffix(".asm")
        .tempfile()
        .map_err(InsertionError::Io)?;
    for address in &addresses {
        writeln!(cleanup_patch, "autoclean ${address:06X}").map_err(InsertionError::Io)?;
    }
    cleanup_patch.flush().map_err(InsertionError::Io)?;

    let image = std::fs::read(working_rom).map_err(InsertionError::Io)?;
    let (header, body) = rom::split_header(&image);
    let header = header.to_vec();
    let mut body = body.to_vec();

    assembler.init().map_err(InsertionError::from)?;
    let result = assembler.patch(PatchParams {
        patch_path: cleanup_patch.path(),
        rom: &mut body,
        max_rom_size: rom::MAX_ROM_SIZE,
    });

    match result {
        Ok(_) => {
            let mut image = header;
            image.extend_from_slice(&body);
            std::fs::write(working_rom, image).map_err(InsertionError::Io)?;
            debug!("Successfully cleaned module '{}'", module_source.display());
            Ok(())
        }
        Err(e @ AsarError::ToolNotFound(_)) => Err(InsertionError::from(e).into()),
        Err(_) => Err(QuickBuildError::MustRebuild(format!(
            "Failed to clean module '{}', must rebuild",
            module_source.display()
        ))),
    }
}

fn read_cleanup_addresses(sidecar: &Path) -> Result<Vec<usize>, QuickBuildError> {
    let text = std::fs::read_to_string(sidecar).map_err(InsertionError::Io)?;
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.parse::<usize>().map_err(|_| {
                QuickBuildError::Insertion(InsertionError::Failed(format!(
                    "cleanup file '{}' contains a malformed address '{}'",
                    sidecar.display(),
                    line
                )))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use convenient_asar::{AsarResult, PatchReport};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Script {
        patches: Vec<String>,
        fail: bool,
    }

    struct RecordingAssembler {
        script: Rc<RefCell<Script>>,
    }

    impl PatchAssembler for RecordingAssembler {
        fn init(&mut self) -> AsarResult<()> {
            Ok(())
        }

        fn patch(&mut self, params: PatchParams<'_>) -> AsarResult<PatchReport> {
            let text = std::fs::read_to_string(params.patch_path).unwrap();
            let mut script = self.script.borrow_mut();
            script.patches.push(text);
            if script.fail {
                return Err(AsarError::PatchFailed {
                    patch: params.patch_path.to_path_buf(),
                    messages: "scripted failure".into(),
                });
            }
            params.rom[0] ^= 0xFF;
            Ok(PatchReport::default())
        }
    }

    fn project() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::TempDir::new().unwrap();
        let rom = dir.path().join("work.sfc");
        std::fs::write(&rom, vec![0u8; 0x8000]).unwrap();
        (dir, rom)
    }

    fn write_sidecar(root: &Path, module: &Path, addresses: &[usize]) {
        let sidecar = paths::module_cleanup_file(root, module);
        std::fs::create_dir_all(sidecar.parent().unwrap()).unwrap();
        let lines: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
        std::fs::write(sidecar, lines.join("\n")).unwrap();
    }

    #[test]
    fn missing_cleanup_file_demands_rebuild() {
        let (dir, rom) = project();
        let script = Rc::new(RefCell::new(Script::default()));
        let mut assembler = RecordingAssembler { script };
        let result = clean_module(
            &dir.path().join("modules/m.asm"),
            &rom,
            dir.path(),
            &mut assembler,
        );
        match result {
            Err(QuickBuildError::MustRebuild(reason)) => {
                assert!(reason.contains("cleanup file is missing"));
            }
            other => panic!("expected MustRebuild, got {other:?}"),
        }
    }

    #[test]
    fn cleanup_synthesises_autoclean_directives() {
        let (dir, rom) = project();
        let module = dir.path().join("modules/m.asm");
        write_sidecar(dir.path(), &module, &[0x108000, 0x10A000]);

        let script = Rc::new(RefCell::new(Script::default()));
        let mut assembler = RecordingAssembler {
            script: script.clone(),
        };
        clean_module(&module, &rom, dir.path(), &mut assembler).unwrap();

        let script = script.borrow();
        assert_eq!(script.patches.len(), 1);
        assert_eq!(script.patches[0], "autoclean $108000\nautoclean $10A000\n");

        // the mutated image was written back
        let image = std::fs::read(&rom).unwrap();
        assert_eq!(image[0], 0xFF);
    }

    #[test]
    fn assembler_failure_demands_rebuild_and_leaves_rom_untouched() {
        let (dir, rom) = project();
        let module = dir.path().join("modules/m.asm");
        write_sidecar(dir.path(), &module, &[0x108000]);

        let script = Rc::new(RefCell::new(Script {
            fail: true,
            ..Script::default()
        }));
        let mut assembler = RecordingAssembler { script };
        let result = clean_module(&module, &rom, dir.path(), &mut assembler);

        assert!(matches!(result, Err(QuickBuildError::MustRebuild(_))));
        let image = std::fs::read(&rom).unwrap();
        assert_eq!(image[0], 0x00);
    }

    #[test]
    fn malformed_address_is_fatal_not_rebuild() {
        let (dir, rom) = project();
        let module = dir.path().join("modules/m.asm");
        let sidecar = paths::module_cleanup_file(dir.path(), &module);
        std::fs::create_dir_all(sidecar.parent().unwrap()).unwrap();
        std::fs::write(sidecar, "not-a-number\n").unwrap();

        let script = Rc::new(RefCell::new(Script::default()));
        let mut assembler = RecordingAssembler { script };
        let result = clean_module(&module, &rom, dir.path(), &mut assembler);
        assert!(matches!(result, Err(QuickBuildError::Insertion(_))));
    }
}
