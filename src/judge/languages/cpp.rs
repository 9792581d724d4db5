use crate::config::types::{CommandLine, Language, Result, Tool};
use crate::judge::adapter::{file_arg, require, BuildPlan, LanguageAdapter};
use crate::judge::probe::CapabilityTable;
use crate::safety::workspace::Workspace;

#[derive(Debug, Clone, Default)]
pub struct CppAdapter;

impl LanguageAdapter for CppAdapter {
    fn language(&self) -> Language {
        Language::Cpp
    }

    fn required_tools(&self) -> &'static [Tool] {
        &[Tool::NativeCompiler]
    }

    fn materialize(&self, workspace: &Workspace, source: &str) -> Result<BuildPlan> {
        let source_path = workspace.write_file("solution.cpp", source.as_bytes())?;
        Ok(BuildPlan {
            run_dir: workspace.run_dir().to_path_buf(),
            source: source_path,
            entry: "solution".to_string(),
            artifact: Some(workspace.run_dir().join("solution")),
        })
    }

    fn compile_command(
        &self,
        tools: &CapabilityTable,
        plan: &BuildPlan,
    ) -> Result<Option<CommandLine>> {
        let compiler = require(tools, Tool::NativeCompiler, self.language())?;
        Ok(Some(
            CommandLine::new(compiler)
                .arg("-std=c++17")
                .arg("-O2")
                .arg("-pipe")
                .arg("-o")
                .arg(plan.entry.clone())
                .arg(file_arg(&plan.source)),
        ))
    }

    fn launch_command(&self, _tools: &CapabilityTable, plan: &BuildPlan) -> Result<CommandLine> {
        Ok(CommandLine::new(format!("./{}", plan.entry)))
    }
}
