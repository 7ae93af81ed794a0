//! Build tasks and release pipeline for sluice.
//!
//! Each task wraps an off-the-shelf tool: scripts go through `sluice-bundle`,
//! stylesheets through grass and lightningcss, and release revisioning hashes
//! files with SHA-256. The release flow is an explicit task graph.

pub mod clean;
pub mod config;
pub mod copy;
pub mod error;
pub mod graph;
pub mod release;
pub mod revision;
pub mod rewrite;
pub mod styles;
pub mod tasks;

pub use config::PipelineConfig;
pub use copy::{CopyResult, CopyTask};
pub use error::PipelineError;
pub use graph::{Stage, TaskGraph};
pub use release::{ReleaseBuilder, ReleaseResult};
pub use revision::RevManifest;
pub use styles::{CompiledStyle, StyleCompiler, StyleError};
