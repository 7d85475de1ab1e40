//! Typed external-tool invocation.
//!
//! The merge, decode, and filter steps shell out to the capture toolchain
//! (mergecap/tshark). Commands are always argument vectors, never
//! interpolated strings, and every invocation is bounded by a timeout.
//! The [`ToolRunner`] trait is the seam that lets the pipeline run against
//! a fake in tests.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{CaptureError, Result};

/// Captured output of a successful tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Contract for invoking an external tool with an argument vector.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run `program` with `args`. Non-zero exit or timeout is an error.
    async fn run(&self, program: &str, args: &[String]) -> Result<ToolOutput>;
}

/// Paths and limits for the capture toolchain binaries.
#[derive(Debug, Clone)]
pub struct CaptureToolchain {
    /// Merge tool (chronological pcap merge).
    pub merge_bin: String,
    /// Decode/filter tool.
    pub decode_bin: String,
    /// Upper bound on a single tool invocation.
    pub timeout: Duration,
}

impl Default for CaptureToolchain {
    fn default() -> Self {
        Self {
            merge_bin: "mergecap".to_string(),
            decode_bin: "tshark".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Production runner backed by `tokio::process::Command`.
pub struct SystemToolRunner {
    timeout: Duration,
}

impl SystemToolRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ToolRunner for SystemToolRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<ToolOutput> {
        debug!(tool = %program, ?args, "invoking external tool");

        let invocation = tokio::process::Command::new(program).args(args).output();

        let output = tokio::time::timeout(self.timeout, invocation)
            .await
            .map_err(|_| {
                CaptureError::tool(
                    program,
                    format!("timed out after {}ms", self.timeout.as_millis()),
                )
            })?
            .map_err(|e| CaptureError::tool(program, format!("failed to spawn: {e}")))?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(CaptureError::tool(
                program,
                format!("exit status {}: {}", output.status, stderr.trim()),
            ));
        }

        Ok(ToolOutput {
            stdout: output.stdout,
            stderr,
        })
    }
}

/// Build the merge invocation: `mergecap -w <out> <raws...>`.
pub fn merge_args(output: &Path, inputs: &[std::path::PathBuf]) -> Vec<String> {
    let mut args = vec!["-w".to_string(), output.display().to_string()];
    args.extend(inputs.iter().map(|p| p.display().to_string()));
    args
}

/// Build the decode invocation: `tshark -r <capture> -T json`.
pub fn decode_args(capture: &Path) -> Vec<String> {
    vec![
        "-r".to_string(),
        capture.display().to_string(),
        "-T".to_string(),
        "json".to_string(),
    ]
}

/// Build the filter invocation: `tshark -r <in> -Y <expr> -w <out>`.
pub fn filter_args(input: &Path, expression: &str, output: &Path) -> Vec<String> {
    vec![
        "-r".to_string(),
        input.display().to_string(),
        "-Y".to_string(),
        expression.to_string(),
        "-w".to_string(),
        output.display().to_string(),
    ]
}
