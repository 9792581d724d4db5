//! Build step of a run: toolchain gate, materialize, strict compile.
//!
//! Launching is left to the caller so the session can decide what to do with
//! a ready command line (or a cancellation that arrived in the meantime).

use crate::config::types::{CommandLine, Language, Result, SandboxError};
use crate::exec::compile::run_captured;
use crate::judge::adapter::{missing_toolchain, BuildPlan, LanguageAdapter};
use crate::judge::probe::CapabilityTable;
use crate::judge::registry::adapter_for;
use crate::safety::workspace::Workspace;
use std::collections::BTreeMap;
use std::time::Duration;

/// Outcome of the build step
#[derive(Debug)]
pub enum BuildOutcome {
    /// Launch this command with the run directory as cwd
    Ready(CommandLine),
    /// Compiler produced diagnostics; the program must not be launched
    Rejected { diagnostics: String, elapsed: Duration },
}

/// Refuse a language whose toolchain is not fully present on this host.
pub fn check_toolchain(
    tools: &CapabilityTable,
    language: Language,
) -> Result<&'static dyn LanguageAdapter> {
    let adapter = adapter_for(language);
    let missing = tools.missing(adapter.required_tools());
    if !missing.is_empty() {
        return Err(missing_toolchain(language, &missing));
    }
    Ok(adapter)
}

/// Write the source into the workspace under the language's naming rules.
pub fn prepare(
    adapter: &dyn LanguageAdapter,
    workspace: &Workspace,
    source: &str,
) -> Result<BuildPlan> {
    adapter.materialize(workspace, source)
}

/// Whether `build` will run a compiler for this plan
pub fn needs_compile(
    adapter: &dyn LanguageAdapter,
    tools: &CapabilityTable,
    plan: &BuildPlan,
) -> bool {
    matches!(adapter.compile_command(tools, plan), Ok(Some(_)))
}

/// Compile when the language needs it, then produce the launch command.
pub async fn build(
    adapter: &dyn LanguageAdapter,
    tools: &CapabilityTable,
    plan: &BuildPlan,
    env: &BTreeMap<String, String>,
    compile_timeout: Duration,
) -> Result<BuildOutcome> {
    if let Some(compile) = adapter.compile_command(tools, plan)? {
        log::debug!("Compiling {}: {}", adapter.language(), compile);
        let output = run_captured(&compile, &plan.run_dir, env, compile_timeout).await?;

        if output.has_diagnostics() {
            return Ok(BuildOutcome::Rejected {
                diagnostics: output.diagnostics,
                elapsed: output.elapsed,
            });
        }
        if !output.status.success() {
            return Err(SandboxError::Compile(format!(
                "compiler exited with {} and no output",
                output.status
            )));
        }
        if let Some(artifact) = &plan.artifact {
            if !artifact.is_file() {
                return Err(SandboxError::Compile(format!(
                    "compiler produced no {}",
                    artifact
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| artifact.display().to_string())
                )));
            }
        }
    }

    Ok(BuildOutcome::Ready(adapter.launch_command(tools, plan)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Tool;
    use crate::safety::workspace::WorkspaceManager;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Stand-in compiler: a shell script that behaves like g++ as far as
    /// output and artifacts go.
    fn fake_compiler(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-g++");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn setup(body: &str) -> (tempfile::TempDir, Workspace, CapabilityTable) {
        let root = tempfile::tempdir().unwrap();
        let compiler = fake_compiler(root.path(), body);
        let workspace = WorkspaceManager::new(root.path().join("scratch"))
            .unwrap()
            .create_workspace()
            .unwrap();
        let tools = CapabilityTable::from_entries([(Tool::NativeCompiler, Some(compiler))]);
        (root, workspace, tools)
    }

    #[test]
    fn test_toolchain_gate_names_language() {
        let err = check_toolchain(&CapabilityTable::default(), Language::Python).unwrap_err();
        assert!(matches!(err, SandboxError::ToolchainUnavailable { .. }));
        assert!(err.to_string().contains("Python"));
    }

    #[test]
    fn test_java_gate_lists_only_missing_tools() {
        let tools = CapabilityTable::from_entries([(
            Tool::BytecodeCompiler,
            Some(PathBuf::from("/usr/bin/javac")),
        )]);
        let err = check_toolchain(&tools, Language::Java).unwrap_err().to_string();
        assert!(err.contains("bytecode runtime"));
        assert!(!err.contains("bytecode compiler"));
    }

    #[tokio::test]
    async fn test_clean_compile_is_ready() {
        // $5 is the -o target, relative to the run directory
        let (_root, workspace, tools) = setup("touch \"$5\"");
        let adapter = check_toolchain(&tools, Language::Cpp).unwrap();
        let plan = prepare(adapter, &workspace, "int main() {}").unwrap();
        assert!(needs_compile(adapter, &tools, &plan));

        let outcome = build(adapter, &tools, &plan, &BTreeMap::new(), Duration::from_secs(5))
            .await
            .unwrap();
        match outcome {
            BuildOutcome::Ready(cmd) => {
                assert_eq!(cmd.program, PathBuf::from("./solution"));
                assert!(workspace.run_dir().join("solution").is_file());
            }
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_warning_blocks_launch_even_on_success() {
        let (_root, workspace, tools) =
            setup("touch \"$5\"; echo 'warning: unused variable' >&2; exit 0");
        let adapter = check_toolchain(&tools, Language::Cpp).unwrap();
        let plan = prepare(adapter, &workspace, "int main() { int x; }").unwrap();

        let outcome = build(adapter, &tools, &plan, &BTreeMap::new(), Duration::from_secs(5))
            .await
            .unwrap();
        match outcome {
            BuildOutcome::Rejected { diagnostics, .. } => {
                assert!(diagnostics.contains("unused variable"))
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_artifact_is_error() {
        let (_root, workspace, tools) = setup("exit 0");
        let adapter = check_toolchain(&tools, Language::Cpp).unwrap();
        let plan = prepare(adapter, &workspace, "int main() {}").unwrap();

        let err = build(adapter, &tools, &plan, &BTreeMap::new(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Compile(_)));
        assert!(err.to_string().contains("solution"));
    }

    #[tokio::test]
    async fn test_silent_failure_is_error() {
        let (_root, workspace, tools) = setup("exit 3");
        let adapter = check_toolchain(&tools, Language::Cpp).unwrap();
        let plan = prepare(adapter, &workspace, "int main() {}").unwrap();

        let err = build(adapter, &tools, &plan, &BTreeMap::new(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Compile(_)));
    }

    #[tokio::test]
    async fn test_interpreted_language_skips_compile() {
        let root = tempfile::tempdir().unwrap();
        let workspace = WorkspaceManager::new(root.path().to_path_buf())
            .unwrap()
            .create_workspace()
            .unwrap();
        let tools = CapabilityTable::from_entries([(
            Tool::Interpreter,
            Some(PathBuf::from("/usr/bin/python3")),
        )]);
        let adapter = check_toolchain(&tools, Language::Python).unwrap();
        let plan = prepare(adapter, &workspace, "print(1)").unwrap();
        assert!(!needs_compile(adapter, &tools, &plan));

        let outcome = build(adapter, &tools, &plan, &BTreeMap::new(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(matches!(outcome, BuildOutcome::Ready(_)));
    }
}
