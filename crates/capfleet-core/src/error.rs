//! Error taxonomy for the capture coordinator.

use std::path::PathBuf;

/// Errors produced by coordinator operations and the capture pipeline.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no agents registered")]
    NoAgentsRegistered,

    #[error("no raw captures present to merge")]
    NoCapturesToMerge,

    #[error("tool '{tool}' invocation failed: {message}")]
    ToolInvocationFailed { tool: String, message: String },

    #[error("filter tool succeeded but produced no decodable output for expression '{expression}'")]
    FilterOutputMissing { expression: String },

    #[error("storage i/o failed at {path}: {source}")]
    StorageIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CaptureError {
    /// Wrap an io error with the path it occurred on.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StorageIo {
            path: path.into(),
            source,
        }
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolInvocationFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, CaptureError>;
