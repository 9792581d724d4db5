//! Run-scoped scratch directories.
//! Every run gets a uniquely named directory under a shared root so concurrent
//! sessions never collide on disk.

use crate::config::types::{Result, SandboxError};
use crate::safety::safe_cleanup;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Prefix shared by every run directory; the stale sweep only touches these.
const RUN_DIR_PREFIX: &str = "run-";

/// Scratch directory owned by exactly one run
#[derive(Debug)]
pub struct Workspace {
    /// Unique run ID
    run_id: String,
    /// Run-specific workspace directory
    run_dir: PathBuf,
    /// Set once the directory has been removed
    removed: AtomicBool,
}

impl Workspace {
    /// Create new workspace for a run
    pub fn new(base_dir: &Path) -> Result<Self> {
        let run_id = Uuid::new_v4().to_string();
        let run_dir = base_dir.join(format!("{}{}", RUN_DIR_PREFIX, run_id));

        fs::create_dir(&run_dir).map_err(|e| {
            SandboxError::Workspace(format!(
                "Failed to create workspace directory {}: {}",
                run_dir.display(),
                e
            ))
        })?;
        fs::set_permissions(&run_dir, fs::Permissions::from_mode(0o700)).map_err(|e| {
            SandboxError::Workspace(format!(
                "Failed to set permissions on {}: {}",
                run_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            run_id,
            run_dir,
            removed: AtomicBool::new(false),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Write a file directly inside the run directory
    pub fn write_file(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(SandboxError::Workspace(format!(
                "invalid workspace file name: {:?}",
                name
            )));
        }
        let path = self.run_dir.join(name);
        fs::write(&path, content).map_err(|e| {
            SandboxError::Workspace(format!("Failed to write {}: {}", path.display(), e))
        })?;
        Ok(path)
    }

    /// Remove the run directory (idempotent, never fails).
    /// Returns false when removal hit an error; the error is only logged.
    pub fn cleanup(&self) -> bool {
        if self.removed.swap(true, Ordering::SeqCst) {
            return true;
        }
        match safe_cleanup::remove_tree_secure(&self.run_dir) {
            Ok(()) => {
                log::debug!("Removed workspace {}", self.run_dir.display());
                true
            }
            Err(e) => {
                log::warn!("Failed to remove run directory {}: {}", self.run_dir.display(), e);
                false
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Creates workspaces under a shared root
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    base_dir: PathBuf,
}

impl WorkspaceManager {
    /// Create new workspace manager
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_dir).map_err(|e| {
            SandboxError::Workspace(format!(
                "Failed to create workspace base directory {}: {}",
                base_dir.display(),
                e
            ))
        })?;

        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create new workspace for a run
    pub fn create_workspace(&self) -> Result<Workspace> {
        Workspace::new(&self.base_dir)
    }

    /// Remove run directories older than `max_age` left behind by a previous process
    pub fn cleanup_old_workspaces(&self, max_age: std::time::Duration) -> Result<usize> {
        let mut cleaned = 0;
        let now = std::time::SystemTime::now();

        let entries = fs::read_dir(&self.base_dir).map_err(|e| {
            SandboxError::Workspace(format!(
                "Failed to read workspace directory {}: {}",
                self.base_dir.display(),
                e
            ))
        })?;

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    log::warn!("Failed to read directory entry: {}", e);
                    continue;
                }
            };

            if !entry.file_name().to_string_lossy().starts_with(RUN_DIR_PREFIX) {
                continue;
            }

            let path = entry.path();
            let metadata = match fs::symlink_metadata(&path) {
                Ok(m) if m.is_dir() => m,
                Ok(_) => continue,
                Err(e) => {
                    log::warn!("Failed to get metadata for {}: {}", path.display(), e);
                    continue;
                }
            };

            let age = match metadata.modified().map(|m| now.duration_since(m)) {
                Ok(Ok(d)) => d,
                // Future timestamp or unsupported mtime
                _ => continue,
            };

            if age >= max_age {
                log::info!("Cleaning up stale workspace: {}", path.display());
                match safe_cleanup::remove_tree_secure(&path) {
                    Ok(()) => cleaned += 1,
                    Err(e) => {
                        log::warn!("Failed to remove stale workspace {}: {}", path.display(), e)
                    }
                }
            }
        }

        Ok(cleaned)
    }
}
