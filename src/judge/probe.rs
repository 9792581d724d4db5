//! Host toolchain detection.
//!
//! The capability table is built once at startup and shared read-only by all
//! sessions. A missing tool only disables the languages that depend on it.

use crate::config::types::{Language, Tool};
use crate::judge::registry::adapter_for;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Resolved executable per logical tool. Immutable once probed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CapabilityTable {
    tools: BTreeMap<Tool, Option<PathBuf>>,
}

impl CapabilityTable {
    /// Build a table from explicit entries. Tools not listed are unavailable.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Tool, Option<PathBuf>)>,
    {
        let mut tools: BTreeMap<Tool, Option<PathBuf>> =
            Tool::ALL.iter().map(|tool| (*tool, None)).collect();
        for (tool, path) in entries {
            tools.insert(tool, path);
        }
        Self { tools }
    }

    pub fn resolve(&self, tool: Tool) -> Option<&Path> {
        self.tools.get(&tool).and_then(|p| p.as_deref())
    }

    pub fn is_available(&self, tool: Tool) -> bool {
        self.resolve(tool).is_some()
    }

    /// Tools from `required` that are not present on this host
    pub fn missing(&self, required: &[Tool]) -> Vec<Tool> {
        required
            .iter()
            .copied()
            .filter(|tool| !self.is_available(*tool))
            .collect()
    }

    pub fn supports(&self, language: Language) -> bool {
        self.missing(adapter_for(language).required_tools()).is_empty()
    }

    pub fn available_languages(&self) -> Vec<Language> {
        Language::ALL
            .iter()
            .copied()
            .filter(|language| self.supports(*language))
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (Tool, Option<&Path>)> {
        self.tools.iter().map(|(tool, path)| (*tool, path.as_deref()))
    }
}

/// Probe the host's executable search path.
pub fn probe() -> CapabilityTable {
    let table = CapabilityTable::from_entries(
        Tool::ALL
            .iter()
            .map(|tool| (*tool, resolve_first(*tool, |name| which::which(name).ok()))),
    );
    log_table(&table);
    table
}

/// Probe against an explicit search path instead of `$PATH`.
pub fn probe_in<P: AsRef<OsStr>>(search_path: P) -> CapabilityTable {
    let cwd = std::env::temp_dir();
    let search_path = search_path.as_ref();
    let table = CapabilityTable::from_entries(Tool::ALL.iter().map(|tool| {
        let found = resolve_first(*tool, |name| {
            which::which_in(name, Some(search_path), &cwd).ok()
        });
        (*tool, found)
    }));
    log_table(&table);
    table
}

fn resolve_first<F>(tool: Tool, mut lookup: F) -> Option<PathBuf>
where
    F: FnMut(&str) -> Option<PathBuf>,
{
    tool.candidates().iter().find_map(|name| lookup(name))
}

fn log_table(table: &CapabilityTable) {
    for (tool, path) in table.entries() {
        match path {
            Some(path) => log::info!("Toolchain {}: {}", tool.describe(), path.display()),
            None => log::warn!(
                "Toolchain {} unavailable (tried: {})",
                tool.describe(),
                tool.candidates().join(", ")
            ),
        }
    }
    for language in Language::ALL {
        if !table.supports(language) {
            log::warn!("{} runs are disabled on this host", language.display_name());
        }
    }
}
