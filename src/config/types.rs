//! Core types and structures for the sandterm service

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Supported source languages - closed set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Interpreted: launched directly against the source file
    Python,
    /// Natively compiled: compiled to a host executable first
    Cpp,
    /// Compiled to bytecode: compiled to class files, run on the JVM
    Java,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Python, Language::Cpp, Language::Java];

    /// Canonical wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Cpp => "cpp",
            Self::Java => "java",
        }
    }

    /// Human-readable name used in client-facing errors
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Python => "Python",
            Self::Cpp => "C++",
            Self::Java => "Java",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = SandboxError;

    fn from_str(value: &str) -> Result<Self> {
        // Normalize common aliases so adapter selection stays deterministic.
        match value.trim().to_lowercase().as_str() {
            "python" | "py" => Ok(Self::Python),
            "cpp" | "c++" | "cxx" | "cc" => Ok(Self::Cpp),
            "java" => Ok(Self::Java),
            _ => Err(SandboxError::UnsupportedLanguage(value.to_string())),
        }
    }
}

/// Logical host tools the service can depend on
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Interpreter,
    NativeCompiler,
    BytecodeCompiler,
    BytecodeRuntime,
    Shell,
}

impl Tool {
    pub const ALL: [Tool; 5] = [
        Tool::Interpreter,
        Tool::NativeCompiler,
        Tool::BytecodeCompiler,
        Tool::BytecodeRuntime,
        Tool::Shell,
    ];

    /// Executable names tried in priority order
    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            Self::Interpreter => &["python3", "python"],
            Self::NativeCompiler => &["g++", "clang++", "c++"],
            Self::BytecodeCompiler => &["javac"],
            Self::BytecodeRuntime => &["java"],
            Self::Shell => &["bash", "sh"],
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Interpreter => "interpreter",
            Self::NativeCompiler => "native compiler",
            Self::BytecodeCompiler => "bytecode compiler",
            Self::BytecodeRuntime => "bytecode runtime",
            Self::Shell => "shell",
        }
    }
}

/// Fully resolved command line handed to a process launcher
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Custom error types for sandterm
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("{language} is unavailable on this host: missing {missing}")]
    ToolchainUnavailable { language: String, missing: String },

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Failed to start process: {0}")]
    Spawn(String),

    #[error("Compilation failed: {0}")]
    Compile(String),

    #[error("Filesystem error: {0}")]
    Filesystem(String),
}

/// Result type alias for sandterm operations
pub type Result<T> = std::result::Result<T, SandboxError>;
