//! Assembly patch insertion.
//!
//! A patch is applied to the working ROM through the patch assembler. The
//! byte ranges the patch wrote (its hijacks) are kept for the build report:
//! the quick builder compares them across runs to detect a re-inserted patch
//! that no longer covers bytes it previously owned.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use convenient_asar::{PatchAssembler, PatchParams};
use tracing::{debug, info};

use crate::config::Configuration;
use crate::dependency::{ConfigurationDependency, Policy, ResourceDependency};
use crate::error::InsertionError;
use crate::paths;
use crate::rom;

use super::Insertable;

pub struct Patch {
    source: PathBuf,
    rom: PathBuf,
    assembler: Box<dyn PatchAssembler>,
    hijacks: Option<Vec<(usize, usize)>>,
    config_deps: HashSet<ConfigurationDependency>,
}

impl Patch {
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
            hijacks: None,
            config_deps,
        }
    }
}

impl Insertable for Patch {
    fn init(&mut self) -> Result<(), InsertionError> {
        self.assembler.init()?;
        if !self.source.exists() {
            return Err(InsertionError::ResourceNotFound(format!(
                "patch source not found at '{}'",
                self.source.display()
            )));
        }
        Ok(())
    }

    fn insert(&mut self) -> Result<(), InsertionError> {
        info!("Applying patch '{}'", self.source.display());

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

        debug!(
            "Patch '{}' wrote {} block(s)",
            self.source.display(),
            report.written_blocks.len()
        );
        self.hijacks = Some(report.written_blocks);
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

    fn hijacks(&self) -> Option<&[(usize, usize)]> {
        self.hijacks.as_deref()
    }
}

/// Files pulled in by `incsrc`/`incbin` directives, transitively for source
/// includes. Included files that do not exist are still reported: their
/// absence is a recordable state.
pub(crate) fn scan_includes(source: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut visited = HashSet::new();
    let mut queue = vec![source.to_path_buf()];
    let _ = visited.insert(source.to_path_buf());

    while let Some(file) = queue.pop() {
        let Ok(text) = std::fs::read_to_string(&file) else {
            continue;
        };
        let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();

        for line in text.lines() {
            let line = line.trim();
            let (directive, rest) = if let Some(rest) = line.strip_prefix("incsrc") {
                ("incsrc", rest)
            } else if let Some(rest) = line.strip_prefix("incbin") {
                ("incbin", rest)
            } else {
                continue;
            };
            // the directive must stand alone, not prefix a longer identifier
            if !rest.starts_with(char::is_whitespace) {
                continue;
            }

            let Some(target) = include_target(rest) else {
                continue;
            };

            let path = dir.join(target);
            if directive == "incsrc" && visited.insert(path.clone()) {
                queue.push(path.clone());
            }
            found.push(path);
        }
    }

    found.sort();
    found.dedup();
    found
}

/// The include target after a directive: a quoted path runs to the closing
/// quote, a bare one to the first whitespace or `;` comment.
fn include_target(rest: &str) -> Option<&str> {
    let rest = rest.trim_start();
    let target = match rest.strip_prefix('"') {
        Some(quoted) => quoted.split('"').next(),
        None => rest
            .split(|c: char| c == ';' || c.is_whitespace())
            .next(),
    };
    target.filter(|target| !target.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_are_scanned_transitively() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path();
        std::fs::write(
            root.join("main.asm"),
            "incsrc \"defs.asm\"\nlda #$00\nincbin data.bin\n",
        )
        .unwrap();
        std::fs::write(root.join("defs.asm"), "incsrc more.asm\n").unwrap();
        std::fs::write(root.join("more.asm"), "!x = 1\n").unwrap();

        let includes = scan_includes(&root.join("main.asm"));
        assert_eq!(
            includes,
            vec![
                root.join("data.bin"),
                root.join("defs.asm"),
                root.join("more.asm"),
            ]
        );
    }

    #[test]
    fn include_cycles_terminate() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path();
        std::fs::write(root.join("a.asm"), "incsrc b.asm\n").unwrap();
        std::fs::write(root.join("b.asm"), "incsrc a.asm\n").unwrap();

        let includes = scan_includes(&root.join("a.asm"));
        assert_eq!(includes, vec![root.join("a.asm"), root.join("b.asm")]);
    }

    #[test]
    fn trailing_comments_do_not_leak_into_targets() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path();
        std::fs::write(
            root.join("main.asm"),
            "incsrc \"defs.asm\" ; pull in defs\nincbin data.bin ; raw table\n",
        )
        .unwrap();
        std::fs::write(root.join("defs.asm"), "!x = 1\n").unwrap();

        let includes = scan_includes(&root.join("main.asm"));
        assert_eq!(includes, vec![root.join("data.bin"), root.join("defs.asm")]);
    }

    #[test]
    fn identifiers_starting_with_a_directive_are_not_includes() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path();
        std::fs::write(
            root.join("main.asm"),
            "incsrcthing:\n    rts\nincbin:\nincsrc\n",
        )
        .unwrap();

        assert!(scan_includes(&root.join("main.asm")).is_empty());
    }

    #[test]
    fn missing_includes_are_still_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path();
        std::fs::write(root.join("main.asm"), "incbin gone.bin\n").unwrap();

        let includes = scan_includes(&root.join("main.asm"));
        assert_eq!(includes, vec![root.join("gone.bin")]);
    }
}
