//! Append-only audit trail.
//!
//! Every coordinator operation appends one entry on both its success and
//! failure paths. The sink is an injected observer so business logic stays
//! testable without a filesystem; appends are best-effort and may never
//! fail the caller's request.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub detail: String,
    pub ok: bool,
}

/// Side-channel observer for operation outcomes.
pub trait AuditSink: Send + Sync {
    /// Record an event. Implementations must not propagate failures.
    fn append(&self, event: &str, detail: &str, ok: bool);
}

/// Appends one JSON line per entry to the store's audit log.
pub struct FileAuditSink {
    path: PathBuf,
}

impl FileAuditSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl AuditSink for FileAuditSink {
    fn append(&self, event: &str, detail: &str, ok: bool) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event: event.to_string(),
            detail: detail.to_string(),
            ok,
        };

        let result = serde_json::to_string(&entry).map_err(std::io::Error::other).and_then(|line| {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            writeln!(file, "{line}")
        });

        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "audit append failed");
        }
    }
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().expect("audit lock poisoned").clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, event: &str, detail: &str, ok: bool) {
        self.entries.lock().expect("audit lock poisoned").push(AuditEntry {
            timestamp: Utc::now(),
            event: event.to_string(),
            detail: detail.to_string(),
            ok,
        });
    }
}
