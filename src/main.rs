use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cmd;

#[derive(Parser)]
#[command(name = "sandforge")]
#[command(version, about = "Conversational code generation into a live sandbox")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify a prompt and print the edit intent as JSON
    Classify {
        prompt: String,
        /// Project to classify against (no project when omitted)
        #[arg(long)]
        manifest_dir: Option<PathBuf>,
    },
    /// Print the primary and context files selected for a prompt
    Context {
        prompt: String,
        /// Project to select from (defaults to the project dir)
        #[arg(long)]
        manifest_dir: Option<PathBuf>,
    },
    /// List the packages generated code depends on
    Deps {
        /// Source files; generated output is read from stdin when empty
        files: Vec<PathBuf>,
        /// Packages to leave out because they are already installed
        #[arg(long)]
        installed: Vec<String>,
    },
    /// Replay generated output through the stream parser as JSON lines
    Parse {
        /// Transcript file (stdin when omitted)
        file: Option<PathBuf>,
        #[arg(long, default_value = "64")]
        chunk_size: usize,
        /// Also print raw chunk events
        #[arg(long)]
        raw: bool,
    },
    /// Run conversation turns against a local sandbox
    Run {
        /// Single prompt; interactive session when omitted
        prompt: Option<String>,
        /// Replay this transcript instead of calling the generator
        #[arg(long)]
        replay: Option<PathBuf>,
        /// Generator command (overrides sandforge.toml)
        #[arg(long)]
        generator: Option<String>,
        /// Model selector passed to the generator
        #[arg(long)]
        model: Option<String>,
        /// Keep the sandbox directory on exit
        #[arg(long)]
        keep: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default sandforge.toml file
    Init,
}

/// Logs go to stderr; stdout carries command output.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "sandforge=debug"
    } else {
        "sandforge=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Classify {
            prompt,
            manifest_dir,
        } => cmd::cmd_classify(&project_dir, prompt, manifest_dir.as_deref())?,
        Commands::Context {
            prompt,
            manifest_dir,
        } => cmd::cmd_context(&project_dir, prompt, manifest_dir.as_deref())?,
        Commands::Deps { files, installed } => cmd::cmd_deps(files, installed)?,
        Commands::Parse {
            file,
            chunk_size,
            raw,
        } => cmd::cmd_parse(file.as_deref(), *chunk_size, *raw).await?,
        Commands::Run {
            prompt,
            replay,
            generator,
            model,
            keep,
        } => {
            let options = cmd::RunOptions {
                prompt: prompt.clone(),
                replay: replay.clone(),
                generator: generator.clone(),
                model: model.clone(),
                keep: *keep,
            };
            cmd::cmd_run(&cli, project_dir, options).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
