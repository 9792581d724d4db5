//! Service configuration loading from a JSON file plus CLI/env overrides

use crate::config::types::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Full service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listen address
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Shared handshake secret; empty disables authentication
    pub secret: String,
    /// Root under which per-run scratch directories are created
    pub scratch_root: PathBuf,
    /// Upper bound for a single compile invocation
    pub compile_timeout_ms: u64,
    /// How long a superseded run may take to report its exit before its task is aborted
    pub kill_grace_ms: u64,
    /// Terminal size used when a run request omits one
    pub default_cols: u16,
    pub default_rows: u16,
    /// Largest inbound WebSocket frame accepted
    pub max_message_bytes: usize,
    /// WebSocket keepalive ping period
    pub ping_interval_secs: u64,
    /// Scratch directories older than this are swept at startup
    pub stale_workspace_max_age_secs: u64,
    /// Host environment variables passed through to compile/run processes
    pub preserve_env: Vec<String>,
}

impl ServiceConfig {
    /// Runtime root directory scoped by effective UID.
    /// Prevents root and non-root services from colliding on a shared temp dir.
    pub fn default_scratch_root() -> PathBuf {
        let euid = nix::unistd::geteuid();
        std::env::temp_dir().join(format!("sandterm-uid-{}", euid))
    }

    /// Load configuration from a JSON file. Missing keys keep their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: ServiceConfig = serde_json::from_str(&content)
            .map_err(|e| SandboxError::Config(format!("Failed to parse config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(SandboxError::Config("port must be non-zero".to_string()));
        }
        if self.compile_timeout_ms == 0 {
            return Err(SandboxError::Config(
                "compile_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.kill_grace_ms == 0 {
            return Err(SandboxError::Config("kill_grace_ms must be non-zero".to_string()));
        }
        if self.default_cols == 0 || self.default_rows == 0 {
            return Err(SandboxError::Config(
                "default terminal dimensions must be non-zero".to_string(),
            ));
        }
        if self.max_message_bytes == 0 {
            return Err(SandboxError::Config(
                "max_message_bytes must be non-zero".to_string(),
            ));
        }
        if self.scratch_root.as_os_str().is_empty() {
            return Err(SandboxError::Config("scratch_root must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn auth_enabled(&self) -> bool {
        !self.secret.is_empty()
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_millis(self.compile_timeout_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn stale_workspace_max_age(&self) -> Duration {
        Duration::from_secs(self.stale_workspace_max_age_secs)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            secret: String::new(),
            scratch_root: Self::default_scratch_root(),
            // Compile envelope: 30s wall, matching the compile profile of the judge adapters
            compile_timeout_ms: 30_000,
            kill_grace_ms: 2_000,
            default_cols: 80,
            default_rows: 24,
            max_message_bytes: 1024 * 1024,
            ping_interval_secs: 30,
            stale_workspace_max_age_secs: 3_600,
            preserve_env: Vec::new(),
        }
    }
}
