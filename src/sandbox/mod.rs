//! Remote execution environment.
//!
//! [`SandboxProvider`] is the raw provider surface; [`SandboxSession`] owns
//! the lifecycle on top of it. [`LocalProvider`] runs sandboxes as plain
//! directories on this machine.

pub mod local;
pub mod scaffold;
pub mod session;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::ProviderError;

pub use local::LocalProvider;
pub use session::{
    CachedFile, InstallReport, ReadReport, SandboxSession, SessionState, WriteFailure, WriteReport,
};

/// Identifier and address of a live remote environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHandle {
    pub handle_id: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Raw operations of an execution sandbox provider.
///
/// Connection-level failures must be reported as
/// [`ProviderError::Unreachable`]; failures of a single call on an otherwise
/// healthy environment as [`ProviderError::Operation`].
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn create(&self) -> Result<ConnectionHandle, ProviderError>;

    async fn connect(&self, handle_id: &str) -> Result<ConnectionHandle, ProviderError>;

    async fn exec(
        &self,
        handle: &ConnectionHandle,
        command: &str,
    ) -> Result<CommandOutput, ProviderError>;

    /// Write a file, creating parent directories as needed.
    async fn write_file(
        &self,
        handle: &ConnectionHandle,
        path: &str,
        contents: &[u8],
    ) -> Result<(), ProviderError>;

    /// `Ok(None)` when the file does not exist.
    async fn read_file(
        &self,
        handle: &ConnectionHandle,
        path: &str,
    ) -> Result<Option<Vec<u8>>, ProviderError>;

    async fn destroy(&self, handle_id: &str) -> Result<(), ProviderError>;
}

/// Session settings, the `[sandbox]` section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxSettings {
    /// Hard bound on session age
    #[serde(default = "default_lifetime_secs")]
    pub lifetime_secs: u64,
    #[serde(default = "default_install_timeout_secs")]
    pub install_timeout_secs: u64,
    #[serde(default = "default_read_size_limit_bytes")]
    pub read_size_limit_bytes: u64,
    /// Extensions (without dot) returned by `read_files`
    #[serde(default = "default_read_extensions")]
    pub read_extensions: Vec<String>,
    /// Package names are appended to this command
    #[serde(default = "default_install_command")]
    pub install_command: String,
    /// Run during provisioning; empty to skip
    #[serde(default = "default_toolchain_command")]
    pub toolchain_command: String,
    /// Starts the long-running dev process. Must detach and redirect its output.
    #[serde(default = "default_start_command")]
    pub start_command: String,
    /// Base directory for local sandboxes; system temp dir when unset
    #[serde(default)]
    pub root_dir: Option<PathBuf>,
    /// After a partly attributable install failure, install the remaining
    /// packages with a second call
    #[serde(default)]
    pub retry_partial_install: bool,
}

fn default_lifetime_secs() -> u64 {
    1800
}

fn default_install_timeout_secs() -> u64 {
    180
}

fn default_read_size_limit_bytes() -> u64 {
    100 * 1024
}

fn default_read_extensions() -> Vec<String> {
    ["js", "jsx", "ts", "tsx", "css", "json", "html", "md"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_install_command() -> String {
    "npm install --legacy-peer-deps".to_string()
}

fn default_toolchain_command() -> String {
    "npm install --no-audit --no-fund".to_string()
}

fn default_start_command() -> String {
    "nohup npx --yes vite --host 0.0.0.0 --port 5173 > .vite.log 2>&1 &".to_string()
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            lifetime_secs: default_lifetime_secs(),
            install_timeout_secs: default_install_timeout_secs(),
            read_size_limit_bytes: default_read_size_limit_bytes(),
            read_extensions: default_read_extensions(),
            install_command: default_install_command(),
            toolchain_command: default_toolchain_command(),
            start_command: default_start_command(),
            root_dir: None,
            retry_partial_install: false,
        }
    }
}
