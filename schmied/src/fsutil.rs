//! Small filesystem helpers shared by insertables and builders.

use std::path::Path;

use walkdir::WalkDir;

/// Recursively copy `source` into `target`, overwriting existing files.
pub fn copy_dir_recursive(source: &Path, target: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(std::io::Error::other)?;
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&destination)?;
        } else {
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let _ = std::fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}

/// Remove a directory tree, tolerating its absence.
pub fn remove_dir_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// All regular files under `dir`, sorted by path.
pub fn files_under(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_preserves_nested_layout() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("src");
        std::fs::create_dir_all(source.join("nested")).unwrap();
        std::fs::write(source.join("a.bin"), b"a").unwrap();
        std::fs::write(source.join("nested/b.bin"), b"b").unwrap();

        let target = dir.path().join("dst");
        copy_dir_recursive(&source, &target).unwrap();

        assert_eq!(std::fs::read(target.join("a.bin")).unwrap(), b"a");
        assert_eq!(std::fs::read(target.join("nested/b.bin")).unwrap(), b"b");
    }

    #[test]
    fn removing_a_missing_dir_is_fine() {
        let dir = tempfile::TempDir::new().unwrap();
        remove_dir_if_exists(&dir.path().join("nope")).unwrap();
    }

    #[test]
    fn files_under_is_sorted_and_files_only() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.bin"), b"").unwrap();
        std::fs::write(dir.path().join("sub/a.bin"), b"").unwrap();

        let files = files_under(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("b.bin"));
        assert!(files[1].ends_with("sub/a.bin"));
    }
}
