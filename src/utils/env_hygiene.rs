//! Environment hygiene for compile and run processes.
//! Children start from a cleared environment; only a deterministic baseline and
//! explicitly preserved host variables are passed through.

use crate::config::types::Tool;
use crate::judge::probe::CapabilityTable;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

/// Deterministic search path appended after the resolved toolchain directories
const BASE_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Loader-injection variables are never passed through
const DENIED_PREFIXES: &[&str] = &["LD_"];

/// Environment sanitization policy
#[derive(Debug, Clone, Default)]
pub struct EnvPolicy {
    /// Host variables copied through verbatim when present
    pub preserve: Vec<String>,
}

impl EnvPolicy {
    pub fn new(preserve: Vec<String>) -> Self {
        Self { preserve }
    }

    /// Build the environment for a process running inside `run_dir`.
    pub fn child_environment(
        &self,
        run_dir: &Path,
        tools: &CapabilityTable,
    ) -> BTreeMap<String, String> {
        let mut env_map = BTreeMap::new();

        for key in &self.preserve {
            if is_denied(key) {
                log::warn!("Refusing to preserve dangerous environment variable: {}", key);
                continue;
            }
            if let Ok(value) = env::var(key) {
                env_map.insert(key.clone(), value);
            }
        }

        let run_dir = run_dir.to_string_lossy().to_string();
        env_map.insert("PATH".to_string(), search_path(tools));
        env_map.insert("HOME".to_string(), run_dir.clone());
        env_map.insert("TMPDIR".to_string(), run_dir);
        env_map.insert("TERM".to_string(), "xterm-256color".to_string());
        env_map.insert("LANG".to_string(), "C.UTF-8".to_string());
        env_map.insert("LC_ALL".to_string(), "C.UTF-8".to_string());
        if let Some(shell) = tools.resolve(Tool::Shell) {
            env_map.insert("SHELL".to_string(), shell.to_string_lossy().to_string());
        }

        env_map
    }
}

fn is_denied(key: &str) -> bool {
    DENIED_PREFIXES.iter().any(|prefix| key.starts_with(prefix))
}

/// Resolved toolchain directories first, so helpers a compiler execs
/// (assemblers, linkers) are found next to it.
fn search_path(tools: &CapabilityTable) -> String {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for (_, path) in tools.entries() {
        if let Some(parent) = path.and_then(Path::parent) {
            if !dirs.iter().any(|d| d == parent) {
                dirs.push(parent.to_path_buf());
            }
        }
    }

    let mut parts: Vec<String> = dirs
        .iter()
        .map(|d| d.to_string_lossy().to_string())
        .collect();
    for base in BASE_PATH.split(':') {
        if !parts.iter().any(|p| p == base) {
            parts.push(base.to_string());
        }
    }
    parts.join(":")
}
