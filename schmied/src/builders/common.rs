//! Termination steps shared by the full and quick builders.

use std::path::Path;

use tracing::{debug, warn};

use crate::config::Configuration;
use crate::fsutil;
use crate::paths;

/// Mirror the module output directory into the old-symbols cache, replacing
/// the previous cache contents.
pub fn cache_module_outputs(project_root: &Path, module_output: &Path) -> std::io::Result<()> {
    let cache = paths::module_old_symbols_dir(project_root);
    fsutil::remove_dir_if_exists(&cache)?;
    if module_output.is_dir() {
        fsutil::copy_dir_recursive(module_output, &cache)?;
        debug!("Cached module outputs to '{}'", cache.display());
    }
    Ok(())
}

/// Atomically move the finished working ROM onto the configured output
/// path. Falls back to copy-and-remove across filesystems.
pub fn move_temp_to_output(temporary_rom: &Path, output_rom: &Path) -> std::io::Result<()> {
    if let Some(parent) = output_rom.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(temporary_rom, output_rom) {
        Ok(()) => Ok(()),
        Err(_) => {
            let _ = std::fs::copy(temporary_rom, output_rom)?;
            std::fs::remove_file(temporary_rom)
        }
    }
}

/// Mirror the project graphics folders next to the output ROM so the
/// external editor finds them when the ROM is opened in place.
pub fn link_output_rom_to_graphics(config: &Configuration) -> std::io::Result<()> {
    let Some(output_dir) = config.output_rom.parent() else {
        return Ok(());
    };
    if output_dir == config.project_root {
        return Ok(());
    }

    for folder in ["Graphics", "ExGraphics"] {
        let source = config.project_root.join(folder);
        if !source.is_dir() {
            continue;
        }
        if let Err(e) = fsutil::copy_dir_recursive(&source, &output_dir.join(folder)) {
            warn!(
                "Failed to mirror '{}' next to the output ROM: {}",
                source.display(),
                e
            );
        }
    }
    Ok(())
}
