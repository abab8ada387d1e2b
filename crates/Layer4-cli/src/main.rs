//! agentd CLI - Main entry point

mod cli;

use agentd_foundation::ServiceConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// agentd - run AI agent tasks in a bounded worker pool and sandboxed containers
#[derive(Parser, Debug)]
#[command(name = "agentd")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Load settings from this file instead of the global/project files
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one agent task and print its result as JSON
    Run {
        /// Prompt handed to the agent on stdin
        #[arg(short, long)]
        prompt: String,

        /// Model identifier (substituted for {model} in the agent args)
        #[arg(short, long)]
        model: String,

        /// Project identifier exported to the agent
        #[arg(long)]
        project: String,

        /// Task timeout in seconds (defaults to the pool setting)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// How long to wait for the result, in seconds
        #[arg(short, long)]
        wait: Option<u64>,
    },
    /// Check a shell command against the security policy
    CheckCommand {
        command: String,
    },
    /// Check a path against the security policy
    CheckPath {
        path: String,

        /// Check write access instead of read access
        #[arg(short, long)]
        write: bool,
    },
    /// Run one command in a fresh sandbox, then destroy it
    Exec {
        /// Task the sandbox belongs to
        #[arg(long)]
        task_id: String,

        /// Host project directory mounted read-only at /project
        #[arg(long)]
        project_path: Option<PathBuf>,

        /// Command timeout in seconds (defaults to the sandbox setting)
        #[arg(short, long)]
        timeout: Option<u64>,

        command: String,
    },
    /// Remove managed sandboxes older than the given age
    Sweep {
        /// Maximum age in seconds
        #[arg(long, default_value = "3600")]
        max_age: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = match &args.config {
        Some(path) => ServiceConfig::load_from(path)?,
        None => ServiceConfig::load()?,
    };

    match args.command {
        Command::Run {
            prompt,
            model,
            project,
            timeout,
            wait,
        } => cli::run_task(&config, prompt, model, project, timeout, wait).await,
        Command::CheckCommand { command } => cli::check_command(&config, &command),
        Command::CheckPath { path, write } => cli::check_path(&config, &path, write),
        Command::Exec {
            task_id,
            project_path,
            timeout,
            command,
        } => cli::exec_once(&config, &task_id, project_path.as_deref(), &command, timeout).await,
        Command::Sweep { max_age } => cli::sweep(&config, max_age).await,
    }
}
