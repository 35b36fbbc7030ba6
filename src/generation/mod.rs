//! Generation backends.
//!
//! A backend turns a [`GenerationRequest`] into an incremental text stream.
//! Model choice is an opaque selector passed through in the request.

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::GenerationError;
use crate::intent::{EditIntent, IntentKind};

pub type GenerationStream = BoxStream<'static, Result<String, GenerationError>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub path: String,
    pub content: String,
}

/// Summary of an earlier turn, oldest first in the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorTurn {
    pub prompt: String,
    pub intent: IntentKind,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub system_context: String,
    #[serde(default)]
    pub intent: Option<EditIntent>,
    pub primary_files: Vec<FileSnapshot>,
    pub context_files: Vec<FileSnapshot>,
    pub conversation_history: Vec<PriorTurn>,
    pub prompt: String,
}

pub trait GenerationBackend: Send + Sync {
    /// Start generating. Transport problems surface as `Err` items; the
    /// stream ends after the first one.
    fn generate(&self, request: GenerationRequest) -> GenerationStream;
}

/// Backend that runs an external command per request.
///
/// The request is written to the command's stdin as JSON and every stdout
/// line is forwarded as one chunk. A non-zero exit ends the stream with
/// `StreamFailed`.
pub struct CommandBackend {
    command: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandBackend {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir: None,
        }
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl GenerationBackend for CommandBackend {
    fn generate(&self, request: GenerationRequest) -> GenerationStream {
        let (tx, rx) = mpsc::channel(64);
        let command = self.command.clone();
        let args = self.args.clone();
        let working_dir = self.working_dir.clone();

        tokio::spawn(async move {
            if let Err(err) = run_command(&command, &args, working_dir, &request, &tx).await {
                let _ = tx.send(Err(err)).await;
            }
        });

        receiver_stream(rx)
    }
}

async fn run_command(
    command: &str,
    args: &[String],
    working_dir: Option<PathBuf>,
    request: &GenerationRequest,
    tx: &mpsc::Sender<Result<String, GenerationError>>,
) -> Result<(), GenerationError> {
    let payload = serde_json::to_vec(request)?;

    let mut cmd = Command::new(command);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|source| GenerationError::SpawnFailed {
        command: command.to_string(),
        source,
    })?;
    debug!("Spawned generation backend '{}' (pid {:?})", command, child.id());

    // Backends may start writing output before they have read all input
    if let Some(mut stdin) = child.stdin.take() {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&payload).await {
                warn!("Failed to write generation request: {}", e);
            }
            let _ = stdin.shutdown().await;
        });
    }

    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text).await;
            text
        })
    });

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| GenerationError::StreamFailed("backend stdout unavailable".into()))?;
    let mut lines = BufReader::new(stdout).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| GenerationError::StreamFailed(format!("reading output: {}", e)))?
    {
        if tx.send(Ok(format!("{}\n", line))).await.is_err() {
            // Consumer went away; kill_on_drop ends the child
            debug!("Generation consumer dropped, stopping backend");
            return Ok(());
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| GenerationError::StreamFailed(format!("waiting for backend: {}", e)))?;
    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    if !status.success() {
        let code = status.code().unwrap_or(-1);
        warn!("Generation backend exited with {}", code);
        return Err(GenerationError::StreamFailed(format!(
            "'{}' exited with {}: {}",
            command,
            code,
            last_lines(&stderr, 5)
        )));
    }
    Ok(())
}

fn receiver_stream<T: Send + 'static>(rx: mpsc::Receiver<T>) -> BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.trim().lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

/// Backend that replays a fixed transcript, split into chunks.
///
/// Used for offline runs and tests. Every request it receives is recorded.
pub struct ReplayBackend {
    chunks: Vec<String>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ReplayBackend {
    pub fn new(chunks: Vec<String>) -> Self {
        Self {
            chunks,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Split `text` into chunks of at most `chunk_size` characters.
    pub fn from_text(text: &str, chunk_size: usize) -> Self {
        Self::new(split_chunks(text, chunk_size))
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl GenerationBackend for ReplayBackend {
    fn generate(&self, request: GenerationRequest) -> GenerationStream {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let items: Vec<Result<String, GenerationError>> =
            self.chunks.iter().cloned().map(Ok).collect();
        stream::iter(items).boxed()
    }
}

/// Split text into chunks of at most `chunk_size` characters, never inside
/// a UTF-8 sequence.
pub fn split_chunks(text: &str, chunk_size: usize) -> Vec<String> {
    let size = chunk_size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}
