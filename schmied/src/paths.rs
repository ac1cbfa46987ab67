//! Well-known locations inside a project tree.
//!
//! Everything the engine persists between builds lives under a single
//! `.schmied` directory at the project root.

use std::path::{Path, PathBuf};

const STATE_DIR: &str = ".schmied";

/// Internal state directory under the project root.
pub fn state_dir(project_root: &Path) -> PathBuf {
    project_root.join(STATE_DIR)
}

/// The persisted build report.
pub fn build_report(project_root: &Path) -> PathBuf {
    state_dir(project_root).join("build_report.json")
}

/// The temporary working ROM inside the configured temporary folder. Named
/// after the output ROM so editor-side companion files resolve the same way.
pub fn temporary_rom(temporary_folder: &Path, output_rom: &Path) -> PathBuf {
    let file_name = output_rom
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("rom.sfc"));
    temporary_folder.join(file_name)
}

/// Directory of per-module cleanup sidecar files, mirroring the module
/// source tree.
pub fn module_cleanup_dir(project_root: &Path) -> PathBuf {
    state_dir(project_root).join("cleanup")
}

/// Cleanup sidecar for one module source file: the source path relative to
/// the project root, with the extension swapped for `.addr`.
pub fn module_cleanup_file(project_root: &Path, module_source: &Path) -> PathBuf {
    let relative = module_source
        .strip_prefix(project_root)
        .unwrap_or(module_source);
    module_cleanup_dir(project_root).join(relative.with_extension("addr"))
}

/// Cache of module outputs from the previous build, mirroring the module
/// output directory.
pub fn module_old_symbols_dir(project_root: &Path) -> PathBuf {
    state_dir(project_root).join("old_symbols")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_file_mirrors_module_source_path() {
        let root = Path::new("/proj");
        let cleanup = module_cleanup_file(root, Path::new("/proj/modules/sub/m.asm"));
        assert_eq!(
            cleanup,
            Path::new("/proj/.schmied/cleanup/modules/sub/m.addr")
        );
    }

    #[test]
    fn temporary_rom_keeps_output_file_name() {
        let rom = temporary_rom(Path::new("/tmp/build"), Path::new("/proj/out/hack.sfc"));
        assert_eq!(rom, Path::new("/tmp/build/hack.sfc"));
    }
}
