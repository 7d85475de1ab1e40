//! Merge → decode → filter pipeline over the capture store.
//!
//! Each step wraps one external-tool invocation. Merge failures are
//! terminal for a stop cycle; filtering never raises and always returns a
//! tagged [`FilterOutcome`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::audit::AuditSink;
use crate::error::{CaptureError, Result};
use crate::obs;
use crate::store::CaptureStore;
use crate::tools::{decode_args, filter_args, merge_args, CaptureToolchain, ToolRunner};

/// Structured form of a decoded capture, as emitted by the decode tool
/// (`tshark -T json`: one JSON array entry per packet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecodedRecord(pub Value);

impl DecodedRecord {
    pub fn packet_count(&self) -> usize {
        self.0.as_array().map(Vec::len).unwrap_or(0)
    }
}

/// Tagged result of a filter run. Never surfaced as an error: filter
/// problems degrade the response, they do not fail it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FilterOutcome {
    Ok { record: DecodedRecord },
    Ko { error: String },
}

impl FilterOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Ok { .. } => "ok",
            Self::Ko { .. } => "ko",
        }
    }
}

/// Orchestrates the external capture toolchain against the store.
pub struct Pipeline {
    store: CaptureStore,
    toolchain: CaptureToolchain,
    runner: Arc<dyn ToolRunner>,
    audit: Arc<dyn AuditSink>,
}

impl Pipeline {
    pub fn new(
        store: CaptureStore,
        toolchain: CaptureToolchain,
        runner: Arc<dyn ToolRunner>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            toolchain,
            runner,
            audit,
        }
    }

    pub fn store(&self) -> &CaptureStore {
        &self.store
    }

    /// Delete all raw captures and derived artifacts ahead of a new round.
    /// Idempotent on an empty store.
    pub fn clear_capture_artifacts(&self) -> Result<()> {
        let result = self.store.clear_round_artifacts();
        self.audit.append(
            "artifacts.cleared",
            self.store.root().display().to_string().as_str(),
            result.is_ok(),
        );
        result
    }

    /// Merge all present raw captures into the single merged capture.
    ///
    /// Any stale merged capture is removed first, so the artifact is
    /// overwritten rather than accumulated. Chronological ordering across
    /// inputs is the merge tool's native behavior.
    pub async fn merge(&self) -> Result<PathBuf> {
        let merged = self.store.merged_capture_path();
        if merged.exists() {
            fs::remove_file(&merged).map_err(|e| CaptureError::storage(&merged, e))?;
        }

        let raws = self.store.raw_captures()?;
        if raws.is_empty() {
            self.audit.append("merge", "no raw captures present", false);
            return Err(CaptureError::NoCapturesToMerge);
        }

        let result = self
            .runner
            .run(&self.toolchain.merge_bin, &merge_args(&merged, &raws))
            .await;

        match result {
            Ok(_) if merged.is_file() => {
                obs::emit_merge_completed(raws.len());
                self.audit
                    .append("merge", &format!("{} raw captures", raws.len()), true);
                Ok(merged)
            }
            Ok(_) => {
                let err = CaptureError::tool(
                    &self.toolchain.merge_bin,
                    "merge reported success but wrote no output",
                );
                self.audit.append("merge", &err.to_string(), false);
                Err(err)
            }
            Err(err) => {
                self.audit.append("merge", &err.to_string(), false);
                Err(err)
            }
        }
    }

    /// Decode `capture` to its structured record, persisting the decoded
    /// JSON at `record_path`.
    pub async fn decode(&self, capture: &Path, record_path: &Path) -> Result<DecodedRecord> {
        let output = self
            .runner
            .run(&self.toolchain.decode_bin, &decode_args(capture))
            .await
            .inspect_err(|e| self.audit.append("decode", &e.to_string(), false))?;

        if output.stdout.is_empty() {
            let err = CaptureError::tool(&self.toolchain.decode_bin, "decode produced no output");
            self.audit.append("decode", &err.to_string(), false);
            return Err(err);
        }

        let value: Value = serde_json::from_slice(&output.stdout).map_err(|e| {
            let err = CaptureError::tool(
                &self.toolchain.decode_bin,
                format!("decode output is not valid JSON: {e}"),
            );
            self.audit.append("decode", &err.to_string(), false);
            err
        })?;

        fs::write(record_path, &output.stdout)
            .map_err(|e| CaptureError::storage(record_path, e))?;

        let record = DecodedRecord(value);
        obs::emit_decode_completed(capture, record.packet_count());
        self.audit.append(
            "decode",
            &format!("{} packets from {}", record.packet_count(), capture.display()),
            true,
        );
        Ok(record)
    }

    /// Apply `expression` to the merged capture, producing the filtered
    /// capture and its decoded record.
    ///
    /// The empty expression is the identity filter: the filtered capture is
    /// a byte-for-byte copy of the merged one. Always returns a tagged
    /// outcome; nothing escapes as an error.
    pub async fn filter(&self, expression: &str) -> FilterOutcome {
        let outcome = match self.run_filter(expression).await {
            Ok(record) => FilterOutcome::Ok { record },
            Err(err) => FilterOutcome::Ko {
                error: err.to_string(),
            },
        };
        obs::emit_filter_completed(expression, outcome.status());
        self.audit.append(
            "filter",
            &format!("expression '{}' -> {}", expression, outcome.status()),
            outcome.is_ok(),
        );
        outcome
    }

    async fn run_filter(&self, expression: &str) -> Result<DecodedRecord> {
        let merged = self.store.merged_capture_path();
        let filtered = self.store.filtered_capture_path();

        if expression.is_empty() {
            info!(event = "filter.identity", "empty expression, copying merged capture");
            fs::copy(&merged, &filtered).map_err(|e| CaptureError::storage(&filtered, e))?;
        } else {
            self.runner
                .run(
                    &self.toolchain.decode_bin,
                    &filter_args(&merged, expression, &filtered),
                )
                .await?;

            if !filtered.is_file() {
                return Err(CaptureError::FilterOutputMissing {
                    expression: expression.to_string(),
                });
            }
        }

        // A decode failure here means the tool accepted the expression but
        // left nothing decodable behind; collapse it into the same outcome.
        self.decode(&filtered, &self.store.filtered_record_path())
            .await
            .map_err(|e| match e {
                CaptureError::StorageIo { .. } => e,
                _ => CaptureError::FilterOutputMissing {
                    expression: expression.to_string(),
                },
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::registry::AgentId;
    use crate::testkit::FakeCaptureTools;

    fn make_pipeline(runner: Arc<FakeCaptureTools>) -> (tempfile::TempDir, Pipeline) {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptureStore::open(dir.path()).unwrap();
        let pipeline = Pipeline::new(
            store,
            CaptureToolchain::default(),
            runner,
            Arc::new(MemoryAuditSink::new()),
        );
        (dir, pipeline)
    }

    fn write_raw(pipeline: &Pipeline, agent: &str, data: &[u8]) {
        fs::write(
            pipeline.store().raw_capture_path(&AgentId::new(agent)),
            data,
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_merge_with_no_raw_captures_fails() {
        let (_dir, pipeline) = make_pipeline(Arc::new(FakeCaptureTools::new()));
        let err = pipeline.merge().await.unwrap_err();
        assert!(matches!(err, CaptureError::NoCapturesToMerge));
        assert!(!pipeline.store().has_merged_capture());
    }

    #[tokio::test]
    async fn test_merge_combines_raws_and_overwrites_stale_output() {
        let (_dir, pipeline) = make_pipeline(Arc::new(FakeCaptureTools::new()));
        fs::write(pipeline.store().merged_capture_path(), b"stale").unwrap();
        write_raw(&pipeline, "a", b"AAA");
        write_raw(&pipeline, "b", b"BBB");

        let merged = pipeline.merge().await.unwrap();
        let data = fs::read(&merged).unwrap();
        assert_eq!(data, b"AAABBB");
    }

    #[tokio::test]
    async fn test_merge_tool_failure_surfaces() {
        let runner = Arc::new(FakeCaptureTools::new().failing_merge("disk full"));
        let (_dir, pipeline) = make_pipeline(runner);
        write_raw(&pipeline, "a", b"AAA");

        let err = pipeline.merge().await.unwrap_err();
        assert!(matches!(err, CaptureError::ToolInvocationFailed { .. }));
    }

    #[tokio::test]
    async fn test_decode_writes_record_file() {
        let (_dir, pipeline) = make_pipeline(Arc::new(FakeCaptureTools::new()));
        write_raw(&pipeline, "a", b"AAA");
        let merged = pipeline.merge().await.unwrap();

        let record = pipeline
            .decode(&merged, &pipeline.store().merged_record_path())
            .await
            .unwrap();

        assert!(record.packet_count() >= 1);
        assert!(pipeline.store().merged_record_path().is_file());
    }

    #[tokio::test]
    async fn test_empty_expression_copies_merged_byte_identically() {
        let (_dir, pipeline) = make_pipeline(Arc::new(FakeCaptureTools::new()));
        write_raw(&pipeline, "a", b"AAA");
        write_raw(&pipeline, "b", b"BBB");
        pipeline.merge().await.unwrap();

        let outcome = pipeline.filter("").await;
        assert!(outcome.is_ok());

        let merged = fs::read(pipeline.store().merged_capture_path()).unwrap();
        let filtered = fs::read(pipeline.store().filtered_capture_path()).unwrap();
        assert_eq!(merged, filtered);
    }

    #[tokio::test]
    async fn test_filter_tool_failure_is_ko_not_error() {
        let runner = Arc::new(FakeCaptureTools::new().failing_filter("bad expression"));
        let (_dir, pipeline) = make_pipeline(runner);
        write_raw(&pipeline, "a", b"AAA");
        pipeline.merge().await.unwrap();

        match pipeline.filter("tcp").await {
            FilterOutcome::Ko { error } => assert!(error.contains("bad expression")),
            FilterOutcome::Ok { .. } => panic!("expected ko"),
        }
    }

    #[tokio::test]
    async fn test_filter_success_without_output_is_ko() {
        let runner = Arc::new(FakeCaptureTools::new().filter_writes_nothing());
        let (_dir, pipeline) = make_pipeline(runner);
        write_raw(&pipeline, "a", b"AAA");
        pipeline.merge().await.unwrap();

        match pipeline.filter("tcp").await {
            FilterOutcome::Ko { error } => {
                assert!(error.contains("no decodable output"), "got: {error}")
            }
            FilterOutcome::Ok { .. } => panic!("expected ko"),
        }
    }

    #[tokio::test]
    async fn test_filter_writes_decoded_record() {
        let (_dir, pipeline) = make_pipeline(Arc::new(FakeCaptureTools::new()));
        write_raw(&pipeline, "a", b"AAA");
        pipeline.merge().await.unwrap();

        let outcome = pipeline.filter("tcp").await;
        assert!(outcome.is_ok());
        assert!(pipeline.store().filtered_record_path().is_file());
    }
}
