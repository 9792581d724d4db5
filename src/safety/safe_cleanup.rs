use crate::config::types::{Result, SandboxError};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

fn remove_dir_contents(dir: &Path, root_dev: u64) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(SandboxError::Filesystem(format!(
                "read_dir failed for {}: {}",
                dir.display(),
                e
            )))
        }
    };

    for entry in entries {
        let entry = entry.map_err(|e| {
            SandboxError::Filesystem(format!("readdir failed in {}: {}", dir.display(), e))
        })?;
        remove_entry(&entry.path(), root_dev)?;
    }
    Ok(())
}

fn remove_entry(path: &Path, root_dev: u64) -> Result<()> {
    // symlink_metadata never follows the final component, so a link planted
    // by the payload is unlinked rather than traversed.
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(SandboxError::Filesystem(format!(
                "lstat failed for {}: {}",
                path.display(),
                e
            )))
        }
    };

    let outcome = if meta.file_type().is_dir() {
        if meta.dev() != root_dev {
            return Err(SandboxError::Filesystem(format!(
                "Refusing to cross filesystem boundary at {}",
                path.display()
            )));
        }
        remove_dir_contents(path, root_dev)?;
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    };

    match outcome {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SandboxError::Filesystem(format!(
            "unlink failed for {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Remove a tree without following symlinks or leaving the starting filesystem.
/// A path that no longer exists is not an error.
pub fn remove_tree_secure(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(SandboxError::Filesystem(format!(
                "lstat failed for {}: {}",
                path.display(),
                e
            )))
        }
    };
    remove_entry(path, meta.dev())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_nested_tree() {
        let root = tempfile::tempdir().unwrap();
        let tree = root.path().join("run");
        fs::create_dir_all(tree.join("a/b/c")).unwrap();
        fs::write(tree.join("a/b/c/file.txt"), b"data").unwrap();
        fs::write(tree.join("top.txt"), b"data").unwrap();

        remove_tree_secure(&tree).unwrap();
        assert!(!tree.exists());
    }

    #[test]
    fn test_missing_path_is_ok() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("gone");
        assert!(remove_tree_secure(&missing).is_ok());
        assert!(remove_tree_secure(&missing).is_ok());
    }

    #[test]
    fn test_does_not_follow_symlinks() {
        let root = tempfile::tempdir().unwrap();
        let outside = root.path().join("outside");
        fs::create_dir(&outside).unwrap();
        fs::write(outside.join("keep.txt"), b"precious").unwrap();

        let tree = root.path().join("run");
        fs::create_dir(&tree).unwrap();
        std::os::unix::fs::symlink(&outside, tree.join("escape")).unwrap();

        remove_tree_secure(&tree).unwrap();
        assert!(!tree.exists());
        assert!(outside.join("keep.txt").exists());
    }
}
