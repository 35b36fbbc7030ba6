use async_trait::async_trait;
use sandforge_common::normalize_path;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

use super::{CommandOutput, ConnectionHandle, SandboxProvider};
use crate::errors::ProviderError;

/// Provider that runs each sandbox in its own directory under `base_dir`.
///
/// Commands run through `sh -c` with the sandbox directory as working
/// directory. A sandbox whose directory disappeared is unreachable.
pub struct LocalProvider {
    base_dir: PathBuf,
}

impl LocalProvider {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn sandbox_dir(&self, handle_id: &str) -> PathBuf {
        self.base_dir.join(handle_id)
    }

    fn handle_for(&self, handle_id: &str) -> ConnectionHandle {
        ConnectionHandle {
            handle_id: handle_id.to_string(),
            base_url: format!("file://{}", self.sandbox_dir(handle_id).display()),
        }
    }

    fn live_dir(&self, handle_id: &str) -> Result<PathBuf, ProviderError> {
        let dir = self.sandbox_dir(handle_id);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(ProviderError::Unreachable(format!(
                "sandbox directory {} is gone",
                dir.display()
            )))
        }
    }

    /// Resolve a logical path inside the sandbox, refusing escapes.
    fn resolve(&self, handle_id: &str, path: &str) -> Result<PathBuf, ProviderError> {
        let dir = self.live_dir(handle_id)?;
        let escapes = path.split(['/', '\\']).any(|segment| segment == "..");
        let logical = normalize_path(path);
        if escapes || logical.is_empty() {
            return Err(ProviderError::Operation(format!("invalid sandbox path '{}'", path)));
        }
        Ok(dir.join(logical))
    }
}

#[async_trait]
impl SandboxProvider for LocalProvider {
    async fn create(&self) -> Result<ConnectionHandle, ProviderError> {
        let handle_id = format!("sbx-{}", uuid::Uuid::new_v4().simple());
        let dir = self.sandbox_dir(&handle_id);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            ProviderError::Unreachable(format!("failed to create {}: {}", dir.display(), e))
        })?;
        debug!("Created local sandbox at {}", dir.display());
        Ok(self.handle_for(&handle_id))
    }

    async fn connect(&self, handle_id: &str) -> Result<ConnectionHandle, ProviderError> {
        self.live_dir(handle_id)?;
        Ok(self.handle_for(handle_id))
    }

    async fn exec(
        &self,
        handle: &ConnectionHandle,
        command: &str,
    ) -> Result<CommandOutput, ProviderError> {
        let dir = self.live_dir(&handle.handle_id)?;
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&dir)
            .output()
            .await
            .map_err(|e| ProviderError::Operation(format!("failed to run '{}': {}", command, e)))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn write_file(
        &self,
        handle: &ConnectionHandle,
        path: &str,
        contents: &[u8],
    ) -> Result<(), ProviderError> {
        let target = self.resolve(&handle.handle_id, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProviderError::Operation(format!("{}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&target, contents)
            .await
            .map_err(|e| ProviderError::Operation(format!("{}: {}", target.display(), e)))
    }

    async fn read_file(
        &self,
        handle: &ConnectionHandle,
        path: &str,
    ) -> Result<Option<Vec<u8>>, ProviderError> {
        let target = self.resolve(&handle.handle_id, path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ProviderError::Operation(format!(
                "{}: {}",
                target.display(),
                e
            ))),
        }
    }

    async fn destroy(&self, handle_id: &str) -> Result<(), ProviderError> {
        let dir = self.sandbox_dir(handle_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProviderError::Operation(format!(
                "failed to remove {}: {}",
                dir.display(),
                e
            ))),
        }
    }
}
