//! ROM image helpers: copier header handling and the build marker.

use std::path::Path;

use crate::error::InsertionError;

/// Upper bound the assembler may grow an image to.
pub const MAX_ROM_SIZE: usize = 0x80_0000;

/// Marker stamped into reserved space of every ROM this tool produces.
pub const BUILD_MARKER: &[u8; 8] = b"SCHMIED1";

/// Offset of the marker inside the unheadered image (reserved expanded
/// header area below the internal ROM name).
pub const MARKER_OFFSET: usize = 0x7FB0;

/// Size in bytes of an optional copier header. A headered dump's length is
/// not a multiple of the 32 KiB bank size; masking with 0x7FFF recovers the
/// header length (0 or 0x200 in practice).
pub fn header_size(rom_len: usize) -> usize {
    rom_len & 0x7FFF
}

/// Split an image into its copier header (possibly empty) and the ROM body.
pub fn split_header(rom: &[u8]) -> (&[u8], &[u8]) {
    rom.split_at(header_size(rom.len()))
}

/// Stamp the build marker into the ROM file at `rom_path`.
pub fn write_marker(rom_path: &Path) -> Result<(), InsertionError> {
    let mut image = std::fs::read(rom_path)?;
    let offset = header_size(image.len()) + MARKER_OFFSET;

    if image.len() < offset + BUILD_MARKER.len() {
        return Err(InsertionError::Failed(format!(
            "ROM at '{}' is too small to carry a build marker",
            rom_path.display()
        )));
    }

    image[offset..offset + BUILD_MARKER.len()].copy_from_slice(BUILD_MARKER);
    std::fs::write(rom_path, image)?;
    Ok(())
}

/// Whether the ROM file at `rom_path` carries the build marker.
pub fn has_marker(rom_path: &Path) -> bool {
    let Ok(image) = std::fs::read(rom_path) else {
        return false;
    };
    let offset = header_size(image.len()) + MARKER_OFFSET;
    image
        .get(offset..offset + BUILD_MARKER.len())
        .map(|bytes| bytes == BUILD_MARKER)
        .unwrap_or(false)
}
