//! Sandbox session lifecycle.
//!
//! ```text
//! Absent ──create──▶ Provisioning ──ok──▶ Ready ◀──reconnect ok──┐
//!   ▲                    │ fail              │ remote failure     │
//!   │◀───────────────────┘                   ▼                    │
//!   │◀──────────── reconnect failed ──── Degraded ────────────────┘
//!   │◀──────────── destroy() / lifetime exceeded (any state)
//! ```
//!
//! Every operation holds the session lock for its whole duration, so callers
//! queue instead of running against the remote environment in parallel. The
//! file cache and known-file set are owned here and only exposed through
//! read-only snapshots.

use chrono::{DateTime, Utc};
use regex::Regex;
use sandforge_common::normalize_path;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::scaffold;
use super::{CommandOutput, ConnectionHandle, SandboxProvider, SandboxSettings};
use crate::errors::{ProviderError, SessionError};

// npm ERR! 404 Not Found - GET https://registry.npmjs.org/left-pad - Not found
static NPM_NOT_FOUND_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"404\s+Not Found\s+-\s+GET\s+https?://[^/\s]+/(\S+)").unwrap());

// '@scope/name@^1.0.0' is not in this registry
static NPM_NOT_IN_REGISTRY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'((?:@[^/'\s]+/)?[^@'\s]+)@[^']*' is not in (?:this|the npm) registry").unwrap()
});

// No matching version found for name@^9.9.9
static NPM_NO_VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"No matching version found for ((?:@[^/\s]+/)?[^@\s]+)@").unwrap()
});

static SAFE_PACKAGE_ARG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9@/._~^-]+$").unwrap());

const LIST_FILES_COMMAND: &str = "find . -type f -not -path '*/node_modules/*' -not -path '*/.git/*' -not -path '*/dist/*'";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Absent,
    Provisioning,
    Ready,
    Degraded,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Absent => write!(f, "absent"),
            SessionState::Provisioning => write!(f, "provisioning"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Degraded => write!(f, "degraded"),
        }
    }
}

/// Local mirror of one remote file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedFile {
    pub content: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteFailure {
    pub path: String,
    pub error: String,
}

/// Per-file outcome of a batch write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    /// Paths that did not exist before
    pub created: Vec<String>,
    /// Paths that were overwritten
    pub edited: Vec<String>,
    pub failed: Vec<WriteFailure>,
    /// Not issued because the batch was cancelled
    pub skipped: Vec<String>,
}

/// Outcome of a dependency installation. A failed package is data, not an
/// error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    /// Already installed or duplicated in the request
    pub skipped: Vec<String>,
}

impl InstallReport {
    pub fn is_partial_failure(&self) -> bool {
        !self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReadReport {
    pub files: BTreeMap<String, String>,
    /// Files over the size limit, excluded from `files`
    pub oversized: usize,
}

#[derive(Default)]
struct Inner {
    handle: Option<ConnectionHandle>,
    created_at: Option<Instant>,
    file_cache: BTreeMap<String, CachedFile>,
    known_files: BTreeSet<String>,
    installed: BTreeSet<String>,
    /// Last health probe failed; the next operation reconnects first
    probe_failed: bool,
}

impl Inner {
    fn clear(&mut self) {
        *self = Inner::default();
    }

    fn record_file(&mut self, path: &str, content: String) {
        self.known_files.insert(path.to_string());
        self.file_cache.insert(
            path.to_string(),
            CachedFile {
                content,
                last_modified: Utc::now(),
            },
        );
    }
}

pub struct SandboxSession {
    provider: Arc<dyn SandboxProvider>,
    settings: SandboxSettings,
    scaffold: Vec<(String, String)>,
    inner: Mutex<Inner>,
    state: watch::Sender<SessionState>,
}

impl SandboxSession {
    /// A session that provisions the default Vite + React scaffold.
    pub fn new(provider: Arc<dyn SandboxProvider>, settings: SandboxSettings) -> Self {
        Self::with_scaffold(provider, settings, scaffold::vite_react())
    }

    pub fn with_scaffold(
        provider: Arc<dyn SandboxProvider>,
        settings: SandboxSettings,
        scaffold: Vec<(String, String)>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Absent);
        Self {
            provider,
            settings,
            scaffold,
            inner: Mutex::new(Inner::default()),
            state,
        }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Sandbox session {} -> {}", previous, next);
        }
    }

    /// Provision a new remote environment.
    ///
    /// Fails with `AlreadyActive` unless the session is `Absent`. On
    /// `ProvisionFailed` the half-created environment is torn down and the
    /// session stays `Absent`.
    pub async fn create(&self) -> Result<ConnectionHandle, SessionError> {
        let mut inner = self.inner.lock().await;
        if let Some(handle) = &inner.handle {
            return Err(SessionError::AlreadyActive {
                handle_id: handle.handle_id.clone(),
            });
        }

        self.set_state(SessionState::Provisioning);
        match self.provision().await {
            Ok(handle) => {
                inner.clear();
                for (path, content) in &self.scaffold {
                    inner.record_file(&normalize_path(path), content.clone());
                }
                inner.installed = scaffold::declared_packages(&self.scaffold).into_iter().collect();
                inner.handle = Some(handle.clone());
                inner.created_at = Some(Instant::now());
                self.set_state(SessionState::Ready);
                info!("Sandbox {} ready at {}", handle.handle_id, handle.base_url);
                Ok(handle)
            }
            Err(err) => {
                inner.clear();
                self.set_state(SessionState::Absent);
                warn!("Sandbox provisioning failed: {}", err);
                Err(err)
            }
        }
    }

    async fn provision(&self) -> Result<ConnectionHandle, SessionError> {
        let handle = self
            .provider
            .create()
            .await
            .map_err(|e| SessionError::ProvisionFailed(e.to_string()))?;
        debug!("Provisioning sandbox {}", handle.handle_id);

        let setup = async {
            for (path, content) in &self.scaffold {
                self.provider
                    .write_file(&handle, &normalize_path(path), content.as_bytes())
                    .await
                    .map_err(|e| format!("writing scaffold file {}: {}", path, e))?;
            }
            tokio::try_join!(
                self.run_setup(&handle, &self.settings.toolchain_command),
                self.run_setup(&handle, &self.settings.start_command),
            )?;
            Ok::<(), String>(())
        };

        if let Err(reason) = setup.await {
            if let Err(e) = self.provider.destroy(&handle.handle_id).await {
                warn!("Failed to tear down {} after provisioning error: {}", handle.handle_id, e);
            }
            return Err(SessionError::ProvisionFailed(reason));
        }
        Ok(handle)
    }

    async fn run_setup(&self, handle: &ConnectionHandle, command: &str) -> Result<(), String> {
        if command.trim().is_empty() {
            return Ok(());
        }
        debug!("Provisioning step: {}", command);
        let output = self
            .provider
            .exec(handle, command)
            .await
            .map_err(|e| format!("'{}': {}", command, e))?;
        if !output.success() {
            return Err(format!(
                "'{}' exited with {}: {}",
                command,
                output.exit_code,
                output.stderr.trim()
            ));
        }
        Ok(())
    }

    /// Make sure the session can serve an operation, reconnecting when
    /// degraded.
    async fn ensure_live(&self, inner: &mut Inner) -> Result<ConnectionHandle, SessionError> {
        let Some(handle) = inner.handle.clone() else {
            return Err(SessionError::NoSession);
        };

        let lifetime = Duration::from_secs(self.settings.lifetime_secs);
        if inner.created_at.is_none_or(|t| t.elapsed() >= lifetime) {
            warn!("Sandbox {} exceeded its {}s lifetime", handle.handle_id, self.settings.lifetime_secs);
            self.teardown(inner).await;
            return Err(SessionError::SessionExpired {
                handle_id: handle.handle_id,
                reason: "session lifetime exceeded".into(),
            });
        }

        if inner.probe_failed {
            inner.probe_failed = false;
            self.set_state(SessionState::Degraded);
        }

        if self.state() != SessionState::Degraded {
            return Ok(handle);
        }

        info!("Reconnecting to sandbox {}", handle.handle_id);
        match self.provider.connect(&handle.handle_id).await {
            Ok(reconnected) => {
                inner.handle = Some(reconnected.clone());
                self.set_state(SessionState::Ready);
                Ok(reconnected)
            }
            Err(e) => {
                warn!("Reconnect to sandbox {} failed: {}", handle.handle_id, e);
                inner.clear();
                self.set_state(SessionState::Absent);
                Err(SessionError::SessionExpired {
                    handle_id: handle.handle_id,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Move to `Degraded`, keeping all local state.
    fn degrade(&self, operation: &str, err: &ProviderError) -> SessionError {
        warn!("Sandbox {} failed: {}", operation, err);
        self.set_state(SessionState::Degraded);
        SessionError::Transient {
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }

    async fn teardown(&self, inner: &mut Inner) {
        if let Some(handle) = &inner.handle
            && let Err(e) = self.provider.destroy(&handle.handle_id).await
        {
            warn!("Ignoring teardown failure for {}: {}", handle.handle_id, e);
        }
        inner.clear();
        self.set_state(SessionState::Absent);
    }

    pub async fn write_files<I, P, C>(&self, files: I) -> Result<WriteReport, SessionError>
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<String>,
    {
        self.write_files_until(files, &CancellationToken::new()).await
    }

    /// Write files in order. Once `cancel` fires no further write is issued;
    /// the remaining paths are reported as skipped.
    pub async fn write_files_until<I, P, C>(
        &self,
        files: I,
        cancel: &CancellationToken,
    ) -> Result<WriteReport, SessionError>
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<String>,
    {
        let mut inner = self.inner.lock().await;
        let handle = self.ensure_live(&mut inner).await?;
        let mut report = WriteReport::default();

        for (path, content) in files {
            let path = normalize_path(path.as_ref());
            if cancel.is_cancelled() {
                report.skipped.push(path);
                continue;
            }
            let content: String = content.into();

            match self
                .provider
                .write_file(&handle, &path, content.as_bytes())
                .await
            {
                Ok(()) => {
                    if inner.known_files.contains(&path) {
                        report.edited.push(path.clone());
                    } else {
                        report.created.push(path.clone());
                    }
                    inner.record_file(&path, content);
                }
                Err(e) if e.is_unreachable() => return Err(self.degrade("write_files", &e)),
                Err(e) => {
                    warn!("Write of {} failed: {}", path, e);
                    report.failed.push(WriteFailure {
                        path,
                        error: e.to_string(),
                    });
                }
            }
        }

        debug!(
            "Wrote files: {} created, {} edited, {} failed",
            report.created.len(),
            report.edited.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Install packages with one batched call.
    ///
    /// Duplicates and already installed names are skipped. Per-package
    /// failures, including a timed-out install, come back in the report.
    /// A failed batch fails every package in it unless
    /// `retry_partial_install` is set, in which case the packages not named
    /// in the error output get one more call.
    pub async fn install_dependencies<I, S>(&self, names: I) -> Result<InstallReport, SessionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.inner.lock().await;
        let handle = self.ensure_live(&mut inner).await?;
        let mut report = InstallReport::default();

        let mut pending: Vec<String> = Vec::new();
        for name in names {
            let name: String = name.into();
            let name = name.trim().to_string();
            if name.is_empty() {
                continue;
            }
            if inner.installed.contains(&name) || pending.contains(&name) {
                if !report.skipped.contains(&name) {
                    report.skipped.push(name);
                }
            } else if SAFE_PACKAGE_ARG_REGEX.is_match(&name) {
                pending.push(name);
            } else {
                warn!("Refusing to install suspicious package name '{}'", name);
                report.failed.push(name);
            }
        }

        if pending.is_empty() {
            return Ok(report);
        }

        let (succeeded, failed) = match self.run_install(&handle, &pending).await? {
            InstallAttempt::Succeeded => (pending, Vec::new()),
            InstallAttempt::Failed(attributed) => {
                let (failed, rest): (Vec<String>, Vec<String>) =
                    pending.into_iter().partition(|n| attributed.contains(n));
                if failed.is_empty() || rest.is_empty() || !self.settings.retry_partial_install {
                    (Vec::new(), failed.into_iter().chain(rest).collect())
                } else {
                    debug!("Retrying install without {:?}", failed);
                    match self.run_install(&handle, &rest).await? {
                        InstallAttempt::Succeeded => (rest, failed),
                        InstallAttempt::Failed(_) => {
                            (Vec::new(), failed.into_iter().chain(rest).collect())
                        }
                    }
                }
            }
        };

        inner.installed.extend(succeeded.iter().cloned());
        if !failed.is_empty() {
            warn!("Failed to install: {}", failed.join(", "));
        }
        info!("Installed {} package(s)", succeeded.len());
        report.succeeded = succeeded;
        report.failed.extend(failed);
        Ok(report)
    }

    async fn run_install(
        &self,
        handle: &ConnectionHandle,
        packages: &[String],
    ) -> Result<InstallAttempt, SessionError> {
        let command = format!("{} {}", self.settings.install_command, packages.join(" "));
        let timeout = Duration::from_secs(self.settings.install_timeout_secs);
        debug!("Installing: {}", command);

        match tokio::time::timeout(timeout, self.provider.exec(handle, &command)).await {
            Err(_) => {
                warn!("Install timed out after {}s", self.settings.install_timeout_secs);
                Ok(InstallAttempt::Failed(Vec::new()))
            }
            Ok(Err(e)) if e.is_unreachable() => Err(self.degrade("install_dependencies", &e)),
            Ok(Err(e)) => {
                warn!("Install command failed to run: {}", e);
                Ok(InstallAttempt::Failed(Vec::new()))
            }
            Ok(Ok(output)) if output.success() => Ok(InstallAttempt::Succeeded),
            Ok(Ok(output)) => {
                let text = format!("{}\n{}", output.stderr, output.stdout);
                Ok(InstallAttempt::Failed(failed_packages(&text)))
            }
        }
    }

    /// Read remote files with an allowed extension up to `size_limit` bytes.
    ///
    /// Refreshes the cache with what was read.
    pub async fn read_files(
        &self,
        extensions: &[String],
        size_limit: u64,
    ) -> Result<ReadReport, SessionError> {
        let mut inner = self.inner.lock().await;
        let handle = self.ensure_live(&mut inner).await?;

        let listing = match self.provider.exec(&handle, LIST_FILES_COMMAND).await {
            Ok(output) => output.stdout,
            Err(e) if e.is_unreachable() => return Err(self.degrade("read_files", &e)),
            Err(e) => {
                warn!("Listing sandbox files failed: {}", e);
                String::new()
            }
        };

        let allowed: Vec<String> = extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();
        let mut report = ReadReport::default();

        for line in listing.lines() {
            let path = normalize_path(line);
            let ext = path
                .rsplit_once('.')
                .map(|(_, e)| e.to_lowercase())
                .unwrap_or_default();
            if path.is_empty() || !allowed.contains(&ext) {
                continue;
            }

            match self.provider.read_file(&handle, &path).await {
                Ok(Some(bytes)) if bytes.len() as u64 > size_limit => report.oversized += 1,
                Ok(Some(bytes)) => {
                    let content = String::from_utf8_lossy(&bytes).to_string();
                    let unchanged = inner
                        .file_cache
                        .get(&path)
                        .is_some_and(|cached| cached.content == content);
                    if !unchanged {
                        inner.record_file(&path, content.clone());
                    }
                    inner.known_files.insert(path.clone());
                    report.files.insert(path, content);
                }
                Ok(None) => {
                    inner.file_cache.remove(&path);
                    inner.known_files.remove(&path);
                }
                Err(e) if e.is_unreachable() => return Err(self.degrade("read_files", &e)),
                Err(e) => warn!("Skipping unreadable file {}: {}", path, e),
            }
        }

        Ok(report)
    }

    /// Read files using the configured extensions and size limit.
    pub async fn read_project_files(&self) -> Result<ReadReport, SessionError> {
        self.read_files(&self.settings.read_extensions, self.settings.read_size_limit_bytes)
            .await
    }

    /// Run a shell command. A command the provider could not run comes back
    /// as output with exit code -1.
    pub async fn run_command(&self, command: &str) -> Result<CommandOutput, SessionError> {
        let mut inner = self.inner.lock().await;
        let handle = self.ensure_live(&mut inner).await?;

        match self.provider.exec(&handle, command).await {
            Ok(output) => {
                debug!("Command '{}' exited with {}", command, output.exit_code);
                Ok(output)
            }
            Err(e) if e.is_unreachable() => Err(self.degrade("run_command", &e)),
            Err(e) => Ok(CommandOutput {
                stdout: String::new(),
                stderr: e.to_string(),
                exit_code: -1,
            }),
        }
    }

    /// Probe the remote environment.
    ///
    /// Does not change state; a failed probe makes the next operation
    /// reconnect first. Past the lifetime bound the session expires instead.
    pub async fn health_check(&self) -> Result<bool, SessionError> {
        let mut inner = self.inner.lock().await;
        let Some(handle) = inner.handle.clone() else {
            return Ok(false);
        };

        let lifetime = Duration::from_secs(self.settings.lifetime_secs);
        if inner.created_at.is_none_or(|t| t.elapsed() >= lifetime) {
            self.teardown(&mut inner).await;
            return Err(SessionError::SessionExpired {
                handle_id: handle.handle_id,
                reason: "session lifetime exceeded".into(),
            });
        }

        let alive = matches!(
            self.provider.exec(&handle, "true").await,
            Ok(output) if output.success()
        );
        if !alive {
            debug!("Health probe for {} failed", handle.handle_id);
            inner.probe_failed = true;
        }
        Ok(alive)
    }

    /// Tear the session down from any state. Remote teardown errors are
    /// logged and ignored; local state is always cleared.
    pub async fn destroy(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(handle) = &inner.handle {
            info!("Destroying sandbox {}", handle.handle_id);
        }
        self.teardown(&mut inner).await;
    }

    pub async fn connection(&self) -> Option<ConnectionHandle> {
        self.inner.lock().await.handle.clone()
    }

    pub async fn known_files(&self) -> BTreeSet<String> {
        self.inner.lock().await.known_files.clone()
    }

    pub async fn cached_file(&self, path: &str) -> Option<CachedFile> {
        self.inner
            .lock()
            .await
            .file_cache
            .get(&normalize_path(path))
            .cloned()
    }

    pub async fn file_cache(&self) -> BTreeMap<String, CachedFile> {
        self.inner.lock().await.file_cache.clone()
    }

    pub async fn installed_packages(&self) -> BTreeSet<String> {
        self.inner.lock().await.installed.clone()
    }
}

enum InstallAttempt {
    Succeeded,
    /// Names the installer output blamed; empty when none could be attributed
    Failed(Vec<String>),
}

/// Package names an npm-style installer reported as failing.
fn failed_packages(output: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut push = |name: String| {
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    };

    for cap in NPM_NOT_FOUND_REGEX.captures_iter(output) {
        // Tarball URLs look like `name/-/name-1.0.0.tgz`; scopes are escaped
        let path = cap[1].split("/-/").next().unwrap_or("");
        let name = path
            .replace("%2f", "/")
            .replace("%2F", "/")
            .replace("%40", "@");
        push(name.trim_end_matches(['/', '-', ' ']).to_string());
    }
    for cap in NPM_NOT_IN_REGISTRY_REGEX.captures_iter(output) {
        push(cap[1].to_string());
    }
    for cap in NPM_NO_VERSION_REGEX.captures_iter(output) {
        push(cap[1].to_string());
    }
    names
}
