//! Typed error hierarchy for sandforge.
//!
//! One enum per subsystem:
//! - `ContextError`: context selection
//! - `ProviderError`: raw sandbox provider calls
//! - `SessionError`: sandbox session lifecycle
//! - `GenerationError`: generation backend transport
//! - `OrchestratorError`: the per-turn pipeline
//!
//! Partial package installation failures are not errors: they come back as
//! an `InstallReport` with `succeeded`/`failed` lists.

use thiserror::Error;

/// Errors from context selection. Caller errors, never retried.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),
}

/// Errors reported by a sandbox provider.
///
/// `Unreachable` means the remote environment could not be talked to at all
/// and moves a session to `Degraded`. `Operation` is a failure of one
/// specific call (a missing file, a rejected write) and is reported per item.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Sandbox unreachable: {0}")]
    Unreachable(String),

    #[error("Sandbox operation failed: {0}")]
    Operation(String),
}

impl ProviderError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ProviderError::Unreachable(_))
    }
}

/// Errors from the sandbox session state machine.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("No active sandbox session; create one first")]
    NoSession,

    #[error("Sandbox session {handle_id} is already active")]
    AlreadyActive { handle_id: String },

    /// Remote call failed while the session was believed alive. The session is
    /// now `Degraded` and will try to reconnect on the next operation.
    #[error("Transient sandbox failure during {operation}: {message}")]
    Transient { operation: String, message: String },

    /// The remote environment is gone. The session is `Absent` and must be
    /// provisioned again.
    #[error("Sandbox session {handle_id} expired: {reason}")]
    SessionExpired { handle_id: String, reason: String },

    #[error("Sandbox provisioning failed: {0}")]
    ProvisionFailed(String),
}

impl SessionError {
    /// Whether retrying with backoff can succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::Transient { .. } | SessionError::ProvisionFailed(_)
        )
    }
}

/// Errors from the generation backend.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Failed to spawn generation backend '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode generation request: {0}")]
    Request(#[from] serde_json::Error),

    /// Transport broke mid-generation. Files completed before the failure
    /// remain valid.
    #[error("Generation stream failed: {0}")]
    StreamFailed(String),
}

/// Errors from a conversation turn.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Sandbox expired; re-provisioning needs explicit confirmation")]
    ReprovisionRequired,
}
