use crate::config::config::ServiceConfig;
use crate::config::types::{Language, Tool};
use crate::judge::probe::{self, CapabilityTable};
use crate::judge::registry::adapter_for;
use crate::server::{self, ServiceContext};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sandbox service
    Serve {
        /// JSON configuration file; flags and environment override its values
        #[arg(long, env = "SANDTERM_CONFIG")]
        config: Option<PathBuf>,

        /// Listen address
        #[arg(long, env = "SANDTERM_HOST")]
        host: Option<String>,

        /// Listen port
        #[arg(long, env = "SANDTERM_PORT")]
        port: Option<u16>,

        /// Shared handshake secret (empty disables authentication)
        #[arg(long, env = "SANDTERM_SECRET", hide_env_values = true)]
        secret: Option<String>,

        /// Root directory for per-run scratch directories
        #[arg(long)]
        scratch_root: Option<PathBuf>,
    },
    /// Check which language toolchains are available on this host
    CheckDeps {
        /// Show resolved paths and toolchain versions
        #[arg(long)]
        verbose: bool,

        /// Search this PATH-style list instead of $PATH
        #[arg(long)]
        search_path: Option<String>,
    },
}

pub fn run() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            secret,
            scratch_root,
        } => {
            let config = build_config(config.as_deref(), host, port, secret, scratch_root)?;
            serve(config)
        }
        Commands::CheckDeps {
            verbose,
            search_path,
        } => check_language_dependencies(verbose, search_path.as_deref()),
    }
}

/// File values first, then explicit flags/environment on top.
fn build_config(
    path: Option<&Path>,
    host: Option<String>,
    port: Option<u16>,
    secret: Option<String>,
    scratch_root: Option<PathBuf>,
) -> Result<ServiceConfig> {
    let mut config = match path {
        Some(path) => ServiceConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServiceConfig::default(),
    };

    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(secret) = secret {
        config.secret = secret;
    }
    if let Some(scratch_root) = scratch_root {
        config.scratch_root = scratch_root;
    }

    config.validate()?;
    Ok(config)
}

fn serve(config: ServiceConfig) -> Result<()> {
    if !config.auth_enabled() {
        log::warn!("No secret configured, handshake authentication is disabled");
    }

    let capabilities = probe::probe();
    let available = capabilities.available_languages();
    if available.is_empty() {
        log::warn!("No language toolchain found; every run will be refused");
    } else {
        log::info!(
            "Languages available: {}",
            available
                .iter()
                .map(|l| l.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let ctx = ServiceContext::new(config, capabilities)
        .context("failed to prepare the scratch root")?;

    match ctx
        .workspaces
        .cleanup_old_workspaces(ctx.config.stale_workspace_max_age())
    {
        Ok(0) => {}
        Ok(n) => log::info!("Removed {} stale run director{}", n, if n == 1 { "y" } else { "ies" }),
        Err(e) => log::warn!("Stale workspace sweep failed: {}", e),
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    runtime.block_on(async move {
        let addr = ctx.config.listen_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        log::info!(
            "sandterm listening on {} (scratch root {})",
            addr,
            ctx.workspaces.base_dir().display()
        );

        server::serve(Arc::new(ctx), listener, async {
            crate::signal::shutdown_signal().await;
        })
        .await
        .context("server error")?;

        log::info!("sandterm stopped");
        Ok(())
    })
}

/// First line of `<tool> --version` (`-version` for the JVM tools, which print to stderr)
fn tool_version(path: &Path, tool: Tool) -> String {
    use std::process::Command;

    let flag = match tool {
        Tool::BytecodeCompiler | Tool::BytecodeRuntime => "-version",
        _ => "--version",
    };
    match Command::new(path).arg(flag).output() {
        Ok(output) if output.status.success() => {
            let text = if !output.stdout.is_empty() {
                String::from_utf8_lossy(&output.stdout)
            } else {
                String::from_utf8_lossy(&output.stderr)
            };
            text.lines().next().unwrap_or("").trim().to_string()
        }
        Ok(_) => "FAILED".to_string(),
        Err(_) => "NOT RUNNABLE".to_string(),
    }
}

fn check_language_dependencies(verbose: bool, search_path: Option<&str>) -> Result<()> {
    println!("🔍 Checking language dependencies...");
    println!();

    let table: CapabilityTable = match search_path {
        Some(path) => probe::probe_in(path),
        None => probe::probe(),
    };

    let mut missing_languages = Vec::new();

    for language in Language::ALL {
        let required = adapter_for(language).required_tools();
        if table.supports(language) {
            println!("✅ {} - OK", language.display_name());
        } else {
            println!("❌ {} - MISSING", language.display_name());
            missing_languages.push(language);
        }

        if verbose {
            for tool in required {
                match table.resolve(*tool) {
                    Some(path) => println!(
                        "  {} -> {} ({})",
                        tool.describe(),
                        path.display(),
                        tool_version(path, *tool)
                    ),
                    None => println!(
                        "  {} -> NOT FOUND (tried {})",
                        tool.describe(),
                        tool.candidates().join(", ")
                    ),
                }
            }
            println!();
        }
    }

    if verbose {
        match table.resolve(Tool::Shell) {
            Some(path) => println!("shell -> {}", path.display()),
            None => println!("shell -> NOT FOUND (SHELL will not be set for runs)"),
        }
    }

    println!();

    if missing_languages.is_empty() {
        println!("🎉 All language dependencies are installed!");
        println!("✅ sandterm is ready to serve every language");
        return Ok(());
    }

    println!(
        "❌ Missing language dependencies: {}",
        missing_languages
            .iter()
            .map(|l| l.display_name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!();
    println!("🔧 Install manually:");
    for language in &missing_languages {
        match language {
            Language::Python => println!("  • Python: sudo apt install python3"),
            Language::Cpp => println!("  • C++: sudo apt install build-essential g++"),
            Language::Java => println!("  • Java: sudo apt install openjdk-17-jdk"),
        }
    }

    std::process::exit(1);
}
