//! Offline inspection commands: `sandforge classify|context|deps|parse`.
//!
//! All of them print machine-readable output on stdout.

use anyhow::{Context, Result};
use futures::StreamExt;
use futures::stream;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sandforge::config::{CONFIG_DIR, SandforgeToml};
use sandforge::context::ContextSelector;
use sandforge::deps::DependencyExtractor;
use sandforge::errors::GenerationError;
use sandforge::generation::split_chunks;
use sandforge::intent::IntentClassifier;
use sandforge::manifest::scan_dir;
use sandforge::stream::{StreamParser, StreamingSession};
use sandforge_common::StreamEvent;

fn load_toml(project_dir: &Path) -> Result<SandforgeToml> {
    SandforgeToml::load_or_default(&project_dir.join(CONFIG_DIR))
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            Ok(text)
        }
    }
}

pub fn cmd_classify(project_dir: &Path, prompt: &str, manifest_dir: Option<&Path>) -> Result<()> {
    let toml = load_toml(project_dir)?;
    let manifest = manifest_dir
        .map(|dir| scan_dir(dir).with_context(|| format!("Failed to scan {}", dir.display())))
        .transpose()?;

    let intent = IntentClassifier::new(toml.classifier).classify(prompt, manifest.as_ref());
    println!("{}", serde_json::to_string_pretty(&intent)?);
    Ok(())
}

pub fn cmd_context(project_dir: &Path, prompt: &str, manifest_dir: Option<&Path>) -> Result<()> {
    let toml = load_toml(project_dir)?;
    let dir = manifest_dir.unwrap_or(project_dir);
    let manifest =
        scan_dir(dir).with_context(|| format!("Failed to scan {}", dir.display()))?;

    let selected = ContextSelector::with_config(toml.classifier).select(prompt, Some(&manifest))?;
    let output = serde_json::json!({
        "intent": selected.intent.kind,
        "primary_files": selected.primary_files,
        "context_files": selected.context_files,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Print one package per line. Without files, stdin is read as generator
/// output; if it carries no file blocks it is treated as a single script.
pub fn cmd_deps(files: &[PathBuf], installed: &[String]) -> Result<()> {
    let extractor = DependencyExtractor::with_installed(installed.iter().cloned());

    let packages = if files.is_empty() {
        let text = read_input(None)?;
        let mut parser = StreamParser::new();
        parser.push(&text);
        parser.finish();
        let units = parser.into_units();

        if units.is_empty() {
            extractor.extract([("stdin.jsx", text.as_str())], Some(&text))
        } else {
            extractor.extract(
                units.iter().map(|u| (u.path.as_str(), u.content.as_str())),
                Some(&text),
            )
        }
    } else {
        let sources = files
            .iter()
            .map(|path| {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                Ok((path.to_string_lossy().replace('\\', "/"), content))
            })
            .collect::<Result<Vec<(String, String)>>>()?;
        extractor.extract(
            sources.iter().map(|(p, c)| (p.as_str(), c.as_str())),
            None,
        )
    };

    for package in packages {
        println!("{}", package);
    }
    Ok(())
}

/// Feed a transcript through the streaming session in fixed-size chunks.
pub async fn cmd_parse(file: Option<&Path>, chunk_size: usize, raw: bool) -> Result<()> {
    let text = read_input(file)?;
    let chunks: Vec<Result<String, GenerationError>> =
        split_chunks(&text, chunk_size).into_iter().map(Ok).collect();

    let (tx, mut rx) = mpsc::channel(64);
    let session = StreamingSession::new(tx);
    let print = async move {
        while let Some(event) = rx.recv().await {
            if !raw && matches!(event, StreamEvent::RawChunk { .. }) {
                continue;
            }
            println!("{}", serde_json::to_string(&event)?);
        }
        Ok::<(), anyhow::Error>(())
    };

    let (_, printed) = tokio::join!(
        session.run(stream::iter(chunks).boxed(), CancellationToken::new()),
        print
    );
    printed
}
