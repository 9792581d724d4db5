use crate::config::types::{CommandLine, Language, Result, SandboxError, Tool};
use crate::judge::probe::CapabilityTable;
use crate::safety::workspace::Workspace;
use std::fmt;
use std::path::{Path, PathBuf};

/// Files a run's build and launch operate on, all inside the run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    pub run_dir: PathBuf,
    pub source: PathBuf,
    /// Entry symbol (Java class name); the source file stem otherwise
    pub entry: String,
    /// Compiled output that must exist before launch
    pub artifact: Option<PathBuf>,
}

/// Language adapter contract: materialize source, optionally compile, launch.
pub trait LanguageAdapter: fmt::Debug + Send + Sync {
    fn language(&self) -> Language;

    /// Tools that must be present before a run is accepted
    fn required_tools(&self) -> &'static [Tool];

    /// Write the source into the workspace under the language's naming convention
    fn materialize(&self, workspace: &Workspace, source: &str) -> Result<BuildPlan>;

    /// Compile invocation, or `None` for interpreted languages
    fn compile_command(&self, tools: &CapabilityTable, plan: &BuildPlan)
        -> Result<Option<CommandLine>>;

    /// Final interactive command, run with the run directory as cwd
    fn launch_command(&self, tools: &CapabilityTable, plan: &BuildPlan) -> Result<CommandLine>;
}

/// Resolve a tool or report it as the missing dependency for `language`.
pub fn require<'a>(tools: &'a CapabilityTable, tool: Tool, language: Language) -> Result<&'a Path> {
    tools.resolve(tool).ok_or_else(|| missing_toolchain(language, &[tool]))
}

pub fn missing_toolchain(language: Language, missing: &[Tool]) -> SandboxError {
    let missing = missing
        .iter()
        .map(|tool| format!("{} ({})", tool.describe(), tool.candidates().join(" or ")))
        .collect::<Vec<_>>()
        .join(", ");
    SandboxError::ToolchainUnavailable {
        language: language.display_name().to_string(),
        missing,
    }
}

/// Commands run with the run directory as cwd, so files are named bare.
/// Diagnostics then never show where the scratch root lives.
pub(crate) fn file_arg(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .to_string()
}
