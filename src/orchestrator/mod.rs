//! Per-turn pipeline: classify, select, stream, extract, apply.
//!
//! The orchestrator is the single owner of the sandbox session. Remote
//! failures are retried with exponential backoff; an expired sandbox is
//! never replaced without an explicit `reprovision()` call.

pub mod history;

pub use history::{ConversationHistory, HistorySettings, TurnRecord};

use chrono::Utc;
use sandforge_common::{
    FileAction, PackageStage, ProgressEvent, ProjectManifest, StreamEvent, normalize_path,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{ContextSelector, SelectedContext};
use crate::deps::DependencyExtractor;
use crate::errors::{OrchestratorError, SessionError};
use crate::generation::{FileSnapshot, GenerationBackend, GenerationRequest};
use crate::intent::EditIntent;
use crate::manifest::{SourceFile, build_manifest};
use crate::sandbox::{
    CommandOutput, ConnectionHandle, InstallReport, SandboxSession, SessionState, WriteReport,
};
use crate::stream::{FileUnit, StreamOutcome, StreamingSession};

const SYSTEM_CONTEXT: &str = "You are editing a React + Vite project running in a sandbox. \
Return every file you change in full as <file path=\"relative/path\">content</file>. \
Declare npm packages the code needs with <package>name</package>. \
Put private reasoning inside <thinking></thinking>.";

const STREAM_EVENT_BUFFER: usize = 256;

/// The `[retry]` section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, the first included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`.
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << attempt.min(16)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    /// The generation stream broke; files completed before it were applied
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    pub intent: EditIntent,
    pub primary_files: Vec<String>,
    pub context_files: Vec<String>,
    pub status: TurnStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub writes: WriteReport,
    pub install: InstallReport,
}

impl TurnReport {
    fn new(selected: SelectedContext, status: TurnStatus) -> Self {
        Self {
            intent: selected.intent,
            primary_files: selected.primary_files,
            context_files: selected.context_files,
            status,
            failure: None,
            writes: WriteReport::default(),
            install: InstallReport::default(),
        }
    }
}

pub struct Orchestrator {
    session: Arc<SandboxSession>,
    backend: Arc<dyn GenerationBackend>,
    selector: ContextSelector,
    manifest: Option<Arc<ProjectManifest>>,
    history: ConversationHistory,
    retry: RetryPolicy,
    model: Option<String>,
    progress: mpsc::UnboundedSender<ProgressEvent>,
    needs_reprovision: bool,
}

impl Orchestrator {
    pub fn new(
        session: Arc<SandboxSession>,
        backend: Arc<dyn GenerationBackend>,
        progress: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Self {
        Self {
            session,
            backend,
            selector: ContextSelector::default(),
            manifest: None,
            history: ConversationHistory::default(),
            retry: RetryPolicy::default(),
            model: None,
            progress,
            needs_reprovision: false,
        }
    }

    pub fn with_selector(mut self, selector: ContextSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_history_limit(mut self, max_turns: usize) -> Self {
        self.history = ConversationHistory::new(max_turns);
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Start from an existing manifest instead of an empty project.
    pub fn with_manifest(mut self, manifest: ProjectManifest) -> Self {
        self.manifest = Some(Arc::new(manifest));
        self
    }

    pub fn session(&self) -> &Arc<SandboxSession> {
        &self.session
    }

    pub fn manifest(&self) -> Option<Arc<ProjectManifest>> {
        self.manifest.clone()
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn needs_reprovision(&self) -> bool {
        self.needs_reprovision
    }

    /// Run one conversation turn.
    ///
    /// A cancelled stream applies nothing. A failed stream still applies
    /// the files that completed before the failure. Cancelled turns are not
    /// recorded in history.
    pub async fn run_turn(
        &mut self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<TurnReport, OrchestratorError> {
        if self.needs_reprovision {
            self.emit(ProgressEvent::error(
                "Sandbox expired; confirm re-provisioning to continue",
                false,
            ));
            return Err(OrchestratorError::ReprovisionRequired);
        }
        info!("Turn {}: {}", self.history.len() + 1, prompt);

        if self.session.state() == SessionState::Absent {
            let session = Arc::clone(&self.session);
            if let Err(e) = with_retry(&self.retry, "create", || session.create()).await {
                return Err(self.fail(e));
            }
        }

        let selected = self.select(prompt)?;
        debug!(
            "Intent {} ({:.2}): {} primary, {} context files",
            selected.intent.kind,
            selected.intent.confidence,
            selected.primary_files.len(),
            selected.context_files.len()
        );

        let request = self.build_request(prompt, &selected).await;
        let outcome = self.stream(request, &cancel).await;

        let (units, full_text, failure) = match outcome {
            StreamOutcome::Cancelled { .. } => {
                info!("Turn cancelled during generation; nothing applied");
                self.emit(ProgressEvent::error(
                    "Generation cancelled; no files were applied",
                    true,
                ));
                return Ok(TurnReport::new(selected, TurnStatus::Cancelled));
            }
            StreamOutcome::Failed { units, reason } => {
                self.emit(ProgressEvent::error(
                    format!("Generation failed: {}", reason),
                    true,
                ));
                (units, None, Some(reason))
            }
            StreamOutcome::Completed { units, full_text } => (units, Some(full_text), None),
        };

        let writes = if units.is_empty() {
            WriteReport::default()
        } else {
            match self.apply_files(&units, &cancel).await {
                Ok(report) => report,
                Err(e) => return Err(self.fail(e)),
            }
        };

        let installed = self.session.installed_packages().await;
        let packages = DependencyExtractor::with_installed(installed).extract(
            units.iter().map(|u| (u.path.as_str(), u.content.as_str())),
            full_text.as_deref(),
        );
        let install = if packages.is_empty() || cancel.is_cancelled() {
            InstallReport::default()
        } else {
            match self.install(&packages).await {
                Ok(report) => report,
                Err(e) => return Err(self.fail(e)),
            }
        };

        if !writes.created.is_empty() || !writes.edited.is_empty() {
            self.refresh_manifest().await;
        }

        let status = if failure.is_some() {
            TurnStatus::Failed
        } else if cancel.is_cancelled() {
            TurnStatus::Cancelled
        } else {
            TurnStatus::Completed
        };

        if status == TurnStatus::Cancelled {
            info!("Turn cancelled while applying; not recorded in history");
            let mut report = TurnReport::new(selected, status);
            report.writes = writes;
            report.install = install;
            return Ok(report);
        }

        self.history.push(TurnRecord {
            prompt: prompt.to_string(),
            intent: selected.intent.kind,
            confidence: selected.intent.confidence,
            created: writes.created.clone(),
            edited: writes.edited.clone(),
            installed: install.succeeded.clone(),
            timestamp: Utc::now(),
        });

        if status == TurnStatus::Completed {
            self.emit(ProgressEvent::Complete {
                created: writes.created.clone(),
                edited: writes.edited.clone(),
                installed: install.succeeded.clone(),
                failed_packages: install.failed.clone(),
            });
        }
        info!(
            "Turn finished ({:?}): {} created, {} edited, {} installed",
            status,
            writes.created.len(),
            writes.edited.len(),
            install.succeeded.len()
        );

        let mut report = TurnReport::new(selected, status);
        report.failure = failure;
        report.writes = writes;
        report.install = install;
        Ok(report)
    }

    /// Replace an expired sandbox with a fresh one. Files of the old sandbox
    /// are gone, so the manifest starts over.
    pub async fn reprovision(&mut self) -> Result<ConnectionHandle, OrchestratorError> {
        info!("Re-provisioning sandbox");
        self.session.destroy().await;
        self.manifest = None;

        let session = Arc::clone(&self.session);
        match with_retry(&self.retry, "create", || session.create()).await {
            Ok(handle) => {
                self.needs_reprovision = false;
                Ok(handle)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Run a shell command in the sandbox, reporting it as command progress.
    pub async fn run_command(&mut self, command: &str) -> Result<CommandOutput, OrchestratorError> {
        if self.needs_reprovision {
            return Err(OrchestratorError::ReprovisionRequired);
        }
        self.emit(ProgressEvent::CommandProgress {
            command: command.to_string(),
            exit_code: None,
            output: None,
        });

        let session = Arc::clone(&self.session);
        match with_retry(&self.retry, "run_command", || session.run_command(command)).await {
            Ok(output) => {
                let text = format!("{}{}", output.stdout, output.stderr);
                self.emit(ProgressEvent::CommandProgress {
                    command: command.to_string(),
                    exit_code: Some(output.exit_code),
                    output: Some(text),
                });
                self.resync_manifest().await;
                Ok(output)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    pub async fn shutdown(&self) {
        self.session.destroy().await;
    }

    fn select(&self, prompt: &str) -> Result<SelectedContext, OrchestratorError> {
        let limit = self.selector.classifier().config().max_suggestions;
        let recent = self.history.recent_files(limit);

        match self.manifest.as_deref() {
            Some(manifest) => Ok(self
                .selector
                .select_with_history(prompt, Some(manifest), &recent)?),
            None => {
                // Nothing generated yet, so there is nothing to select from
                let intent = self
                    .selector
                    .classifier()
                    .classify_with_history(prompt, None, &recent);
                Ok(SelectedContext {
                    intent,
                    primary_files: Vec::new(),
                    context_files: Vec::new(),
                })
            }
        }
    }

    async fn build_request(&self, prompt: &str, selected: &SelectedContext) -> GenerationRequest {
        let mut system_context = SYSTEM_CONTEXT.to_string();
        if let Some(handle) = self.session.connection().await {
            system_context.push_str(&format!("\nPreview: {}", handle.base_url));
        }
        let installed: Vec<String> = self.session.installed_packages().await.into_iter().collect();
        if !installed.is_empty() {
            system_context.push_str(&format!("\nInstalled packages: {}", installed.join(", ")));
        }

        GenerationRequest {
            model: self.model.clone(),
            system_context,
            intent: Some(selected.intent.clone()),
            primary_files: self.snapshots(&selected.primary_files),
            context_files: self.snapshots(&selected.context_files),
            conversation_history: self.history.prior_turns(),
            prompt: prompt.to_string(),
        }
    }

    fn snapshots(&self, paths: &[String]) -> Vec<FileSnapshot> {
        let Some(manifest) = self.manifest.as_deref() else {
            return Vec::new();
        };
        paths
            .iter()
            .filter_map(|path| {
                manifest.file(path).map(|file| FileSnapshot {
                    path: path.clone(),
                    content: file.content.clone(),
                })
            })
            .collect()
    }

    async fn stream(&self, request: GenerationRequest, cancel: &CancellationToken) -> StreamOutcome {
        let (tx, mut rx) = mpsc::channel(STREAM_EVENT_BUFFER);
        let stream = self.backend.generate(request);
        let progress = self.progress.clone();

        let forward = async move {
            while let Some(event) = rx.recv().await {
                if let Some(event) = progress_for(event) {
                    let _ = progress.send(event);
                }
            }
        };

        let (outcome, ()) = tokio::join!(
            StreamingSession::new(tx).run(stream, cancel.clone()),
            forward
        );
        outcome
    }

    async fn apply_files(
        &self,
        units: &[FileUnit],
        cancel: &CancellationToken,
    ) -> Result<WriteReport, SessionError> {
        let known_before = self.session.known_files().await;
        let session = Arc::clone(&self.session);
        let mut report = with_retry(&self.retry, "write_files", || {
            session.write_files_until(
                units.iter().map(|u| (u.path.as_str(), u.content.clone())),
                cancel,
            )
        })
        .await?;

        // A retried batch rewrites files an earlier attempt already created
        let written: HashSet<String> = report
            .created
            .drain(..)
            .chain(report.edited.drain(..))
            .collect();
        let (created, edited): (Vec<String>, Vec<String>) = units
            .iter()
            .map(|u| normalize_path(&u.path))
            .filter(|path| written.contains(path))
            .partition(|path| !known_before.contains(path));
        report.created = created;
        report.edited = edited;

        let total = units.len();
        for (index, unit) in units.iter().enumerate() {
            let path = normalize_path(&unit.path);
            let action = if report.created.contains(&path) {
                FileAction::Created
            } else if report.edited.contains(&path) {
                FileAction::Edited
            } else if report.failed.iter().any(|f| f.path == path) {
                FileAction::Failed
            } else {
                continue;
            };
            self.emit(ProgressEvent::FileProgress {
                path,
                action,
                current: index + 1,
                total,
            });
        }
        Ok(report)
    }

    async fn install(&self, packages: &[String]) -> Result<InstallReport, SessionError> {
        self.emit(ProgressEvent::PackageProgress {
            stage: PackageStage::Started,
            packages: packages.to_vec(),
            message: None,
        });

        let session = Arc::clone(&self.session);
        let report = with_retry(&self.retry, "install_dependencies", || {
            session.install_dependencies(packages.iter().cloned())
        })
        .await?;

        if !report.succeeded.is_empty() {
            self.emit(ProgressEvent::PackageProgress {
                stage: PackageStage::Installed,
                packages: report.succeeded.clone(),
                message: None,
            });
        }
        if !report.failed.is_empty() {
            self.emit(ProgressEvent::PackageProgress {
                stage: PackageStage::Failed,
                packages: report.failed.clone(),
                message: Some("Some packages could not be installed".into()),
            });
        }
        if !report.skipped.is_empty() {
            self.emit(ProgressEvent::PackageProgress {
                stage: PackageStage::Skipped,
                packages: report.skipped.clone(),
                message: None,
            });
        }
        Ok(report)
    }

    async fn refresh_manifest(&mut self) {
        let cache = self.session.file_cache().await;
        let manifest = build_manifest(cache.into_iter().map(|(path, file)| SourceFile {
            path,
            content: file.content,
            last_modified: file.last_modified,
        }));
        debug!("Manifest rebuilt with {} files", manifest.len());
        self.manifest = Some(Arc::new(manifest));
    }

    /// Commands may touch any file, so re-read the project before rebuilding.
    async fn resync_manifest(&mut self) {
        match self.session.read_project_files().await {
            Ok(report) => {
                if report.oversized > 0 {
                    debug!("{} oversized files left out of the manifest", report.oversized);
                }
                self.refresh_manifest().await;
            }
            Err(e) => warn!("Could not re-read sandbox files: {}", e),
        }
    }

    /// Report a session error and remember when the sandbox needs consent to
    /// be replaced.
    fn fail(&mut self, err: SessionError) -> OrchestratorError {
        match &err {
            SessionError::SessionExpired { .. } => {
                warn!("{}", err);
                self.needs_reprovision = true;
                self.emit(ProgressEvent::error(err.to_string(), false));
            }
            _ => self.emit(ProgressEvent::error(err.to_string(), true)),
        }
        err.into()
    }

    fn emit(&self, event: ProgressEvent) {
        // The interface layer may have gone away
        let _ = self.progress.send(event);
    }
}

fn progress_for(event: StreamEvent) -> Option<ProgressEvent> {
    match event {
        StreamEvent::Thinking { text } => Some(ProgressEvent::Thinking { text }),
        StreamEvent::Narration { text } => Some(ProgressEvent::Conversation { text }),
        StreamEvent::RawChunk { text } => Some(ProgressEvent::Stream { text }),
        StreamEvent::FileComplete {
            path,
            content,
            kind,
        } => Some(ProgressEvent::FileComplete {
            path,
            kind,
            bytes: content.len(),
        }),
        StreamEvent::Done { .. } | StreamEvent::Failed { .. } => None,
    }
}

async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, SessionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SessionError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                let delay = policy.delay(attempt);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    operation,
                    attempt + 1,
                    max_attempts,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
