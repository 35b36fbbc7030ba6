//! Shared domain types for sandforge.
//!
//! Pure data with no I/O: the project manifest model and the two event unions
//! that flow between the streaming parser, the orchestrator and the interface
//! layer.

pub mod events;
pub mod manifest;

pub use events::{FileAction, PackageStage, ProgressEvent, StreamEvent};
pub use manifest::{
    FileKind, GraphNode, ManifestFile, ProjectManifest, ProjectType, Route, normalize_path,
};
