//! Conversation turns against a local sandbox: `sandforge run`.

use anyhow::{Context, Result};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use sandforge::config::SandforgeConfig;
use sandforge::context::ContextSelector;
use sandforge::errors::OrchestratorError;
use sandforge::generation::{CommandBackend, GenerationBackend, ReplayBackend};
use sandforge::orchestrator::{Orchestrator, TurnReport};
use sandforge::sandbox::{LocalProvider, SandboxSession};
use sandforge::ui::TurnUI;
use sandforge_common::ProgressEvent;

use super::super::Cli;

/// Chunk size used when replaying a transcript.
const REPLAY_CHUNK_CHARS: usize = 64;

pub struct RunOptions {
    pub prompt: Option<String>,
    pub replay: Option<PathBuf>,
    pub generator: Option<String>,
    pub model: Option<String>,
    pub keep: bool,
}

pub async fn cmd_run(cli: &Cli, project_dir: PathBuf, options: RunOptions) -> Result<()> {
    let config =
        SandforgeConfig::with_cli_args(project_dir, cli.verbose, options.generator, options.model)?;
    for warning in config.validate() {
        warn!("Config: {}", warning);
    }

    let backend: Arc<dyn GenerationBackend> = match &options.replay {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read transcript {}", path.display()))?;
            Arc::new(ReplayBackend::from_text(&text, REPLAY_CHUNK_CHARS))
        }
        None => Arc::new(
            CommandBackend::new(config.generator_cmd(), config.generator_args().to_vec())
                .working_dir(&config.project_dir),
        ),
    };

    let provider = Arc::new(LocalProvider::new(config.sandbox_root()));
    let session = Arc::new(SandboxSession::new(provider, config.toml.sandbox.clone()));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut orchestrator = Orchestrator::new(session, backend, tx)
        .with_selector(ContextSelector::with_config(config.toml.classifier.clone()))
        .with_retry(config.toml.retry.clone())
        .with_history_limit(config.toml.history.max_turns)
        .with_model(config.model());
    let ui = TurnUI::new(cli.verbose);

    let result = match options.prompt {
        Some(prompt) => run_turn(&mut orchestrator, &mut rx, &ui, &prompt)
            .await
            .map(|_| ())
            .map_err(anyhow::Error::from),
        None => interactive(&mut orchestrator, &mut rx, &ui).await,
    };

    if let Some(handle) = orchestrator.session().connection().await {
        if options.keep {
            println!("Sandbox kept at {}", style(&handle.base_url).cyan());
        } else {
            orchestrator.shutdown().await;
        }
    }
    result
}

/// Run one turn, rendering its progress. Ctrl-C cancels the turn; a second
/// Ctrl-C exits.
async fn run_turn(
    orchestrator: &mut Orchestrator,
    rx: &mut mpsc::UnboundedReceiver<ProgressEvent>,
    ui: &TurnUI,
    prompt: &str,
) -> Result<TurnReport, OrchestratorError> {
    let cancel = CancellationToken::new();
    let first_turn = orchestrator.session().connection().await.is_none();
    ui.start_turn(prompt);

    let result = {
        let turn = orchestrator.run_turn(prompt, cancel.clone());
        tokio::pin!(turn);
        loop {
            tokio::select! {
                result = &mut turn => break result,
                Some(event) = rx.recv() => ui.handle(&event),
                _ = tokio::signal::ctrl_c() => {
                    if cancel.is_cancelled() {
                        ui.finish();
                        eprintln!("Interrupted");
                        std::process::exit(130);
                    }
                    cancel.cancel();
                }
            }
        }
    };

    while let Ok(event) = rx.try_recv() {
        ui.handle(&event);
    }
    ui.finish();

    if first_turn && let Some(handle) = orchestrator.session().connection().await {
        println!("Preview: {}", style(&handle.base_url).cyan());
    }
    result
}

async fn interactive(
    orchestrator: &mut Orchestrator,
    rx: &mut mpsc::UnboundedReceiver<ProgressEvent>,
    ui: &TurnUI,
) -> Result<()> {
    println!(
        "{}",
        style("Describe a change. '!<command>' runs a shell command in the sandbox, 'exit' quits.")
            .dim()
    );

    loop {
        let line = read_prompt().await?;
        let line = line.trim();
        match line {
            "" => continue,
            "exit" | "quit" => break,
            _ => {}
        }

        let result = match line.strip_prefix('!') {
            Some(command) => run_command(orchestrator, rx, ui, command.trim()).await,
            None => run_turn(orchestrator, rx, ui, line).await.map(|_| ()),
        };

        match result {
            Ok(()) => {}
            Err(_) if orchestrator.needs_reprovision() => {
                if !confirm_reprovision().await? {
                    println!("Sandbox not replaced; ending the session.");
                    break;
                }
                let handle = orchestrator.reprovision().await?;
                println!("New sandbox at {}", style(&handle.base_url).cyan());
            }
            Err(e) => {
                while let Ok(event) = rx.try_recv() {
                    ui.handle(&event);
                }
                eprintln!("{}", style(e).red());
            }
        }
    }
    Ok(())
}

async fn run_command(
    orchestrator: &mut Orchestrator,
    rx: &mut mpsc::UnboundedReceiver<ProgressEvent>,
    ui: &TurnUI,
    command: &str,
) -> Result<(), OrchestratorError> {
    let result = orchestrator.run_command(command).await;
    while let Ok(event) = rx.try_recv() {
        ui.handle(&event);
    }
    result.map(|_| ())
}

async fn read_prompt() -> Result<String> {
    tokio::task::spawn_blocking(|| {
        dialoguer::Input::<String>::new()
            .with_prompt("sandforge")
            .allow_empty(true)
            .interact_text()
    })
    .await
    .context("Prompt task failed")?
    .context("Failed to read prompt")
}

async fn confirm_reprovision() -> Result<bool> {
    tokio::task::spawn_blocking(|| {
        dialoguer::Confirm::new()
            .with_prompt(
                "The sandbox expired. Create a new one? Files from the old sandbox are lost",
            )
            .default(true)
            .interact()
    })
    .await
    .context("Prompt task failed")?
    .context("Failed to read confirmation")
}
