//! Pipeline errors.

use std::path::Path;

use sluice_bundle::BundleError;

use crate::styles::StyleError;

/// Errors that can occur while running pipeline tasks.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to read {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("Failed to write {path}: {message}")]
    WriteError { path: String, message: String },

    #[error("Failed to remove {path}: {message}")]
    RemoveError { path: String, message: String },

    #[error("Script build failed: {0}")]
    Bundle(#[from] BundleError),

    #[error("Style build failed: {0}")]
    Style(#[from] StyleError),

    #[error("Invalid revision manifest: {0}")]
    ManifestError(String),

    #[error("Task graph error: {0}")]
    GraphError(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),
}

impl PipelineError {
    pub(crate) fn read(path: &Path, err: impl ToString) -> Self {
        Self::ReadError {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn write(path: &Path, err: impl ToString) -> Self {
        Self::WriteError {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn remove(path: &Path, err: impl ToString) -> Self {
        Self::RemoveError {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}
