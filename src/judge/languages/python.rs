use crate::config::types::{CommandLine, Language, Result, Tool};
use crate::judge::adapter::{file_arg, require, BuildPlan, LanguageAdapter};
use crate::judge::probe::CapabilityTable;
use crate::safety::workspace::Workspace;

#[derive(Debug, Clone, Default)]
pub struct PythonAdapter;

impl LanguageAdapter for PythonAdapter {
    fn language(&self) -> Language {
        Language::Python
    }

    fn required_tools(&self) -> &'static [Tool] {
        &[Tool::Interpreter]
    }

    fn materialize(&self, workspace: &Workspace, source: &str) -> Result<BuildPlan> {
        let source_path = workspace.write_file("solution.py", source.as_bytes())?;
        Ok(BuildPlan {
            run_dir: workspace.run_dir().to_path_buf(),
            source: source_path,
            entry: "solution".to_string(),
            artifact: None,
        })
    }

    fn compile_command(
        &self,
        _tools: &CapabilityTable,
        _plan: &BuildPlan,
    ) -> Result<Option<CommandLine>> {
        // Interpreted: launched directly against the source file.
        Ok(None)
    }

    fn launch_command(&self, tools: &CapabilityTable, plan: &BuildPlan) -> Result<CommandLine> {
        let interpreter = require(tools, Tool::Interpreter, self.language())?;
        Ok(CommandLine::new(interpreter)
            .arg("-B")
            .arg(file_arg(&plan.source)))
    }
}
