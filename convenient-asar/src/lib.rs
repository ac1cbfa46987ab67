//! Convenient wrapper around the asar SNES patch assembler.
//!
//! The build driver applies assembly patches to an in-memory ROM image. This
//! crate hides how that happens behind the [`PatchAssembler`] trait so the
//! engine can be driven by the real assembler in production and by a scripted
//! stand-in under test.
//!
//! The shipped implementation, [`AsarCli`], shells out to the standalone
//! `asar` executable: the unheadered ROM bytes are staged to a temporary
//! file, the patch is applied there, and the mutated image is read back.
//! Written-byte ranges are recovered by diffing the image around the call,
//! which is what patch hijack bookkeeping downstream is built on.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

/// Errors surfaced by a patch assembler.
#[derive(Debug, Error)]
pub enum AsarError {
    /// The assembler executable could not be located or started.
    #[error("asar executable not found at '{0}'")]
    ToolNotFound(PathBuf),

    /// The assembler ran but rejected the patch.
    #[error("asar reported errors for '{patch}':\n{messages}")]
    PatchFailed {
        /// Patch source that failed to apply.
        patch: PathBuf,
        /// Error output captured from the assembler.
        messages: String,
    },

    /// The patched image exceeded the configured maximum ROM size.
    #[error("patched ROM grew to {actual} bytes, above the {maximum} byte cap")]
    RomTooLarge {
        /// Size of the image after patching.
        actual: usize,
        /// Configured upper bound.
        maximum: usize,
    },

    /// I/O failure while staging or reading back the ROM image.
    #[error("I/O error while patching: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for assembler operations.
pub type AsarResult<T> = Result<T, AsarError>;

/// Parameters for a single patch application.
///
/// `rom` holds the image past any copier header; its length is the current
/// ROM size going in and the (possibly grown) size coming out.
pub struct PatchParams<'a> {
    /// Patch source file to assemble.
    pub patch_path: &'a Path,
    /// Unheadered ROM bytes, mutated in place.
    pub rom: &'a mut Vec<u8>,
    /// Upper bound the assembler may grow the image to.
    pub max_rom_size: usize,
}

/// Outcome of a successful patch application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    /// Contiguous `(offset, length)` runs of bytes the patch wrote,
    /// relative to the start of the unheadered image.
    pub written_blocks: Vec<(usize, usize)>,
}

/// A patch assembler the build engine can apply patches through.
pub trait PatchAssembler {
    /// Prepare the assembler for use. Idempotent.
    fn init(&mut self) -> AsarResult<()>;

    /// Apply one patch to the ROM image in `params`.
    fn patch(&mut self, params: PatchParams<'_>) -> AsarResult<PatchReport>;
}

/// [`PatchAssembler`] backed by the standalone `asar` executable.
pub struct AsarCli {
    executable: PathBuf,
    initialized: bool,
}

impl AsarCli {
    /// Create an assembler that invokes `executable`.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            initialized: false,
        }
    }
}

impl PatchAssembler for AsarCli {
    fn init(&mut self) -> AsarResult<()> {
        if self.initialized {
            return Ok(());
        }

        let probe = Command::new(&self.executable).arg("--version").output();
        match probe {
            Ok(output) if output.status.success() => {
                debug!(
                    "Using assembler {}",
                    String::from_utf8_lossy(&output.stdout).trim()
                );
                self.initialized = true;
                Ok(())
            }
            Ok(_) | Err(_) => Err(AsarError::ToolNotFound(self.executable.clone())),
        }
    }

    fn patch(&mut self, params: PatchParams<'_>) -> AsarResult<PatchReport> {
        self.init()?;

        let mut staged = tempfile::Builder::new()
            .prefix("asar-rom-")
            .suffix(".sfc")
            .tempfile()?;
        staged.write_all(params.rom)?;
        staged.flush()?;

        let output = Command::new(&self.executable)
            .arg("--no-title-check")
            .arg(params.patch_path)
            .arg(staged.path())
            .output()
            .map_err(|_| AsarError::ToolNotFound(self.executable.clone()))?;

        if !output.status.success() {
            let mut messages = String::from_utf8_lossy(&output.stderr).into_owned();
            if messages.trim().is_empty() {
                messages = String::from_utf8_lossy(&output.stdout).into_owned();
            }
            return Err(AsarError::PatchFailed {
                patch: params.patch_path.to_path_buf(),
                messages,
            });
        }

        let patched = std::fs::read(staged.path())?;
        if patched.len() > params.max_rom_size {
            return Err(AsarError::RomTooLarge {
                actual: patched.len(),
                maximum: params.max_rom_size,
            });
        }

        let written_blocks = diff_written_blocks(params.rom, &patched);
        *params.rom = patched;
        Ok(PatchReport { written_blocks })
    }
}

/// Coalesce the byte offsets at which `new` differs from `old` into
/// contiguous `(offset, length)` runs. Bytes past the end of `old` count as
/// written.
pub fn diff_written_blocks(old: &[u8], new: &[u8]) -> Vec<(usize, usize)> {
    let mut blocks = Vec::new();
    let mut run_start: Option<usize> = None;

    for offset in 0..new.len() {
        let differs = match old.get(offset) {
            Some(previous) => *previous != new[offset],
            None => true,
        };

        match (differs, run_start) {
            (true, None) => run_start = Some(offset),
            (false, Some(start)) => {
                blocks.push((start, offset - start));
                run_start = None;
            }
            _ => {}
        }
    }

    if let Some(start) = run_start {
        blocks.push((start, new.len() - start));
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_images_produce_no_blocks() {
        let image = vec![0u8; 64];
        assert!(diff_written_blocks(&image, &image).is_empty());
    }

    #[test]
    fn single_changed_byte_is_one_block() {
        let old = vec![0u8; 16];
        let mut new = old.clone();
        new[5] = 0xFF;
        assert_eq!(diff_written_blocks(&old, &new), vec![(5, 1)]);
    }

    #[test]
    fn adjacent_changes_coalesce() {
        let old = vec![0u8; 16];
        let mut new = old.clone();
        new[3] = 1;
        new[4] = 2;
        new[5] = 3;
        new[10] = 4;
        assert_eq!(diff_written_blocks(&old, &new), vec![(3, 3), (10, 1)]);
    }

    #[test]
    fn growth_counts_as_written() {
        let old = vec![0u8; 8];
        let mut new = old.clone();
        new.extend_from_slice(&[9, 9, 9, 9]);
        assert_eq!(diff_written_blocks(&old, &new), vec![(8, 4)]);
    }

    #[test]
    fn missing_executable_reports_tool_not_found() {
        let mut assembler = AsarCli::new("/nonexistent/asar-binary");
        match assembler.init() {
            Err(AsarError::ToolNotFound(path)) => {
                assert_eq!(path, PathBuf::from("/nonexistent/asar-binary"));
            }
            other => panic!("expected ToolNotFound, got {other:?}"),
        }
    }
}
