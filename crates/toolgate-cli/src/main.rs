//! Toolgate CLI
//!
//! Drives the sandbox from the command line.
//!
//! ## Commands
//!
//! - `check`: Show the access decision for a path and operation
//! - `read`: Print a file through the gateway
//! - `ls`: List a directory through the gateway
//! - `run`: Run a terminal command inside the execution sandbox
//! - `grants`: Show the current directory grants

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use toolgate_core::{
    AccessOptions, AutoDenyGate, ConsentGate, ExecuteOptions, FileOperation, ListOptions,
    OperationOptions, ReadOptions, SandboxConfig, SandboxRuntime, TracingAuditSink,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod prompt;

use prompt::TerminalConsentGate;

const CLI_SOURCE: &str = "toolgate-cli";

#[derive(Parser)]
#[command(name = "toolgate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sandboxed file access and tool execution", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, env = "TOOLGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Deny instead of asking when access needs consent
    #[arg(long, global = true)]
    no_prompt: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the access decision for a path
    Check {
        path: PathBuf,

        /// Operation to check (read, write, create, delete, list)
        #[arg(long, default_value = "read")]
        op: String,
    },

    /// Print a text file
    Read { path: PathBuf },

    /// List a directory
    Ls {
        path: PathBuf,

        #[arg(short, long)]
        recursive: bool,

        #[arg(long)]
        max_entries: Option<usize>,
    },

    /// Run a terminal command in the sandbox
    Run {
        /// Timeout in milliseconds (default from configuration)
        #[arg(long)]
        timeout_ms: Option<u64>,

        #[arg(required = true, last = true)]
        command: Vec<String>,
    },

    /// Show directory grants
    Grants,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;

    let consent: Arc<dyn ConsentGate> = if cli.no_prompt {
        Arc::new(AutoDenyGate)
    } else {
        Arc::new(TerminalConsentGate)
    };
    let runtime = SandboxRuntime::new(config, Some(consent), Arc::new(TracingAuditSink))?;
    info!("Toolgate v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Check { path, op } => check(&runtime, path, &op).await,
        Commands::Read { path } => read(&runtime, path).await,
        Commands::Ls {
            path,
            recursive,
            max_entries,
        } => list(&runtime, path, recursive, max_entries).await,
        Commands::Run {
            timeout_ms,
            command,
        } => run(&runtime, timeout_ms, command).await,
        Commands::Grants => {
            grants(&runtime);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<SandboxConfig> {
    match path {
        Some(path) => SandboxConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => Ok(SandboxConfig::default()),
    }
}

fn access_options() -> AccessOptions {
    AccessOptions {
        source: Some(CLI_SOURCE.to_string()),
        ..Default::default()
    }
}

async fn check(runtime: &SandboxRuntime, path: PathBuf, op: &str) -> Result<()> {
    let operation: FileOperation = op.parse()?;
    let result = runtime
        .gateway()
        .check_access(&path, operation, &access_options())
        .await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn read(runtime: &SandboxRuntime, path: PathBuf) -> Result<()> {
    let options = ReadOptions {
        operation: OperationOptions {
            access: access_options(),
            ..Default::default()
        },
        ..Default::default()
    };
    let content = runtime
        .gateway()
        .read_text_file(&path, &options)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    print!("{}", content);
    Ok(())
}

async fn list(
    runtime: &SandboxRuntime,
    path: PathBuf,
    recursive: bool,
    max_entries: Option<usize>,
) -> Result<()> {
    let options = ListOptions {
        recursive,
        max_entries,
        operation: OperationOptions {
            access: access_options(),
            ..Default::default()
        },
    };
    let entries = runtime
        .gateway()
        .list_directory(&path, &options)
        .await
        .with_context(|| format!("cannot list {}", path.display()))?;

    for entry in entries {
        let kind = if entry.is_dir { 'd' } else { '-' };
        let size = entry
            .size
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{} {:>10} {}", kind, size, entry.path);
    }
    Ok(())
}

async fn run(runtime: &SandboxRuntime, timeout_ms: Option<u64>, command: Vec<String>) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        anyhow::bail!("no command given");
    };
    let terminal = runtime.terminal().clone();
    let program = program.clone();
    let args = args.to_vec();

    let mut params = toolgate_core::ToolParams::new();
    params.insert("command".to_string(), program.clone().into());
    params.insert("args".to_string(), serde_json::json!(args).into());

    let result = runtime
        .sandbox()
        .execute(
            "terminal",
            |ctx| async move { terminal.execute(&program, &args, &ctx).await },
            ExecuteOptions {
                params,
                timeout: timeout_ms.map(Duration::from_millis),
                source: Some(CLI_SOURCE.to_string()),
                ..Default::default()
            },
        )
        .await?;

    let output = result.into_result()?;
    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    if output.truncated {
        eprintln!("[output truncated]");
    }
    if output.exit_code != 0 {
        std::process::exit(output.exit_code);
    }
    Ok(())
}

fn grants(runtime: &SandboxRuntime) {
    for grant in runtime.registry().entries() {
        let permissions: Vec<&str> = grant.permissions.iter().map(|op| op.as_str()).collect();
        let expires = grant
            .expires_at
            .map(|e| e.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{} [{}] by {:?}, expires {}",
            grant.path.display(),
            permissions.join(","),
            grant.granted_by,
            expires
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_run_takes_trailing_command() {
        let cli = Cli::try_parse_from([
            "toolgate",
            "--no-prompt",
            "run",
            "--timeout-ms",
            "500",
            "--",
            "ls",
            "-la",
        ])
        .unwrap();
        assert!(cli.no_prompt);
        match cli.command {
            Commands::Run {
                timeout_ms,
                command,
            } => {
                assert_eq!(timeout_ms, Some(500));
                assert_eq!(command, vec!["ls".to_string(), "-la".to_string()]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_config_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"enableUserPrompts": false, "maxConcurrentExecutions": 2}}"#
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let cli = Cli::try_parse_from(["toolgate", "--config", path.as_str(), "grants"]).unwrap();
        let config = load_config(cli.config.as_deref()).unwrap();

        assert!(!config.enable_user_prompts);
        assert_eq!(config.max_concurrent_executions, 2);
    }

    #[test]
    fn test_invalid_config_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toolgate.json");
        std::fs::write(&path, r#"{"maxConcurrentExecutions": 0}"#).unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("toolgate.json"), "{}", err);
        assert!(format!("{:#}", err).contains("maxConcurrentExecutions"));
    }
}
