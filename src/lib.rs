pub mod config;
pub mod context;
pub mod deps;
pub mod errors;
pub mod generation;
pub mod intent;
pub mod manifest;
pub mod orchestrator;
pub mod sandbox;
pub mod stream;
pub mod ui;

pub use sandforge_common::{FileKind, ProgressEvent, ProjectManifest, StreamEvent};
