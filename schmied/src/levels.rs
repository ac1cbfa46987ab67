//! Level file enumeration and source level number extraction.
//!
//! Level files are produced by the external editor, one file per level. Each
//! file carries the level's source number internally; the build engine needs
//! those numbers to verify that no previously inserted level has lost its
//! file (a removed file cannot be quick-built, because no step would
//! re-clean its slot in the ROM).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::InsertionError;

/// File extension of editor level exports.
pub const LEVEL_FILE_EXTENSION: &str = "mwl";

/// Offset of the little-endian source level number inside a level file.
const LEVEL_NUMBER_OFFSET: usize = 0x10;

/// Valid source level numbers are 0x000..=0x1FF.
const LEVEL_NUMBER_MASK: u16 = 0x1FF;

/// Read the source level number stored inside a level file.
pub fn internal_level_number(path: &Path) -> Result<u16, InsertionError> {
    let bytes = std::fs::read(path)?;
    let raw = bytes
        .get(LEVEL_NUMBER_OFFSET..LEVEL_NUMBER_OFFSET + 2)
        .ok_or_else(|| {
            InsertionError::Failed(format!(
                "level file '{}' is truncated",
                path.display()
            ))
        })?;
    Ok(u16::from_le_bytes([raw[0], raw[1]]) & LEVEL_NUMBER_MASK)
}

/// All level files directly inside `levels_dir`, sorted by path.
pub fn enumerate_level_files(levels_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(levels_dir)? {
        let path = entry?.path();
        if path
            .extension()
            .map(|ext| ext == LEVEL_FILE_EXTENSION)
            .unwrap_or(false)
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// The set of source level numbers currently present in `levels_dir`.
pub fn current_level_numbers(levels_dir: &Path) -> Result<BTreeSet<u16>, InsertionError> {
    let mut numbers = BTreeSet::new();
    for file in enumerate_level_files(levels_dir)? {
        let number = internal_level_number(&file).map_err(|e| {
            InsertionError::Failed(format!(
                "Failed to determine source level number of level file '{}': {}",
                file.display(),
                e
            ))
        })?;
        let _ = numbers.insert(number);
    }
    Ok(numbers)
}

/// Write a level file carrying `number` for tests and fixtures.
#[cfg(test)]
pub fn write_level_file(path: &Path, number: u16) -> std::io::Result<()> {
    let mut bytes = vec![0u8; LEVEL_NUMBER_OFFSET + 2];
    bytes[LEVEL_NUMBER_OFFSET..].copy_from_slice(&number.to_le_bytes());
    std::fs::write(path, bytes)
}
