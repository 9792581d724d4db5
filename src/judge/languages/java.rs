use crate::config::types::{CommandLine, Language, Result, Tool};
use crate::judge::adapter::{file_arg, require, BuildPlan, LanguageAdapter};
use crate::judge::probe::CapabilityTable;
use crate::safety::workspace::Workspace;

const DEFAULT_CLASS: &str = "Main";

/// Modifiers that may sit between `public` and `class`
const CLASS_MODIFIERS: &[&str] = &["final", "abstract", "strictfp", "static"];

#[derive(Debug, Clone, Default)]
pub struct JavaAdapter;

/// The public top-level class dictates the file name javac expects.
pub fn detect_class_name(source: &str) -> String {
    for line in source.lines() {
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some("public") {
            continue;
        }
        let mut tokens = tokens.skip_while(|t| CLASS_MODIFIERS.contains(t));
        if tokens.next() != Some("class") {
            continue;
        }
        let Some(raw) = tokens.next() else {
            continue;
        };
        let name = raw
            .split(|c: char| c == '{' || c == '<')
            .next()
            .unwrap_or_default()
            .trim();
        if is_java_identifier(name) {
            return name.to_string();
        }
    }
    DEFAULT_CLASS.to_string()
}

fn is_java_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

impl LanguageAdapter for JavaAdapter {
    fn language(&self) -> Language {
        Language::Java
    }

    fn required_tools(&self) -> &'static [Tool] {
        &[Tool::BytecodeCompiler, Tool::BytecodeRuntime]
    }

    fn materialize(&self, workspace: &Workspace, source: &str) -> Result<BuildPlan> {
        let class_name = detect_class_name(source);
        let source_path =
            workspace.write_file(&format!("{}.java", class_name), source.as_bytes())?;
        Ok(BuildPlan {
            run_dir: workspace.run_dir().to_path_buf(),
            source: source_path,
            artifact: Some(workspace.run_dir().join(format!("{}.class", class_name))),
            entry: class_name,
        })
    }

    fn compile_command(
        &self,
        tools: &CapabilityTable,
        plan: &BuildPlan,
    ) -> Result<Option<CommandLine>> {
        let javac = require(tools, Tool::BytecodeCompiler, self.language())?;
        Ok(Some(
            CommandLine::new(javac)
                .arg("-encoding")
                .arg("UTF-8")
                .arg(file_arg(&plan.source)),
        ))
    }

    fn launch_command(&self, tools: &CapabilityTable, plan: &BuildPlan) -> Result<CommandLine> {
        let java = require(tools, Tool::BytecodeRuntime, self.language())?;
        Ok(CommandLine::new(java)
            .arg("-Dfile.encoding=UTF-8")
            .arg("-XX:+UseSerialGC")
            .arg("-cp")
            .arg(".")
            .arg(plan.entry.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::workspace::WorkspaceManager;
    use std::path::PathBuf;

    #[test]
    fn test_detect_class_name() {
        assert_eq!(detect_class_name("public class Hello {\n}"), "Hello");
        assert_eq!(detect_class_name("public class Hello{"), "Hello");
        assert_eq!(detect_class_name("  public final class Box<T> {"), "Box");
        assert_eq!(detect_class_name("class Helper {}\npublic class App {}"), "App");
        assert_eq!(detect_class_name("class Hidden {}"), "Main");
        assert_eq!(detect_class_name(""), "Main");
    }

    #[test]
    fn test_detect_class_name_rejects_path_like_names() {
        assert_eq!(detect_class_name("public class ../../etc/passwd {"), "Main");
        assert_eq!(detect_class_name("public class 9Lives {"), "Main");
    }

    #[test]
    fn test_java_plan_uses_class_file_naming() {
        let root = tempfile::tempdir().unwrap();
        let workspace = WorkspaceManager::new(root.path().to_path_buf())
            .unwrap()
            .create_workspace()
            .unwrap();
        let tools = CapabilityTable::from_entries([
            (Tool::BytecodeCompiler, Some(PathBuf::from("/usr/bin/javac"))),
            (Tool::BytecodeRuntime, Some(PathBuf::from("/usr/bin/java"))),
        ]);

        let source = "public class Greeter { public static void main(String[] a) {} }";
        let plan = JavaAdapter.materialize(&workspace, source).unwrap();
        assert_eq!(plan.source, workspace.run_dir().join("Greeter.java"));
        assert_eq!(plan.artifact, Some(workspace.run_dir().join("Greeter.class")));

        let compile = JavaAdapter.compile_command(&tools, &plan).unwrap().unwrap();
        assert_eq!(compile.program, PathBuf::from("/usr/bin/javac"));
        assert_eq!(compile.args, vec!["-encoding", "UTF-8", "Greeter.java"]);

        let launch = JavaAdapter.launch_command(&tools, &plan).unwrap();
        assert_eq!(launch.program, PathBuf::from("/usr/bin/java"));
        assert_eq!(
            launch.args,
            vec!["-Dfile.encoding=UTF-8", "-XX:+UseSerialGC", "-cp", ".", "Greeter"]
        );
    }

    #[test]
    fn test_runtime_missing_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let workspace = WorkspaceManager::new(root.path().to_path_buf())
            .unwrap()
            .create_workspace()
            .unwrap();
        let tools = CapabilityTable::from_entries([(
            Tool::BytecodeCompiler,
            Some(PathBuf::from("/usr/bin/javac")),
        )]);
        let plan = JavaAdapter.materialize(&workspace, "").unwrap();
        let err = JavaAdapter.launch_command(&tools, &plan).unwrap_err();
        assert!(err.to_string().contains("bytecode runtime"));
    }
}
