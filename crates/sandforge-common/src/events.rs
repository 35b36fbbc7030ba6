//! Event unions produced during a generation turn.

use serde::{Deserialize, Serialize};

use crate::manifest::FileKind;

/// Events produced by the streaming parser, in strict arrival order.
///
/// `Done` and `Failed` are terminal: exactly one of them ends a stream and
/// nothing follows it. A path appears in at most one `FileComplete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Thinking {
        text: String,
    },
    Narration {
        text: String,
    },
    RawChunk {
        text: String,
    },
    FileComplete {
        path: String,
        content: String,
        kind: FileKind,
    },
    Done {
        full_text: String,
    },
    Failed {
        reason: String,
    },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Failed { .. })
    }
}

/// What happened to a file when it was applied to the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Created,
    Edited,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStage {
    Started,
    Installed,
    Failed,
    Skipped,
}

/// Progress surface pushed to the interface layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProgressEvent {
    Thinking {
        text: String,
    },
    Conversation {
        text: String,
    },
    Stream {
        text: String,
    },
    FileComplete {
        path: String,
        kind: FileKind,
        bytes: usize,
    },
    PackageProgress {
        stage: PackageStage,
        packages: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    FileProgress {
        path: String,
        action: FileAction,
        current: usize,
        total: usize,
    },
    CommandProgress {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
    Complete {
        created: Vec<String>,
        edited: Vec<String>,
        installed: Vec<String>,
        failed_packages: Vec<String>,
    },
    Error {
        message: String,
        /// Whether retrying the same turn can succeed without user action
        recoverable: bool,
    },
}

impl ProgressEvent {
    pub fn error(message: impl Into<String>, recoverable: bool) -> Self {
        ProgressEvent::Error {
            message: message.into(),
            recoverable,
        }
    }
}
