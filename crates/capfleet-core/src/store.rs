//! Capture store: the shared filesystem area holding raw and derived
//! capture artifacts.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/raw/<identity>.pcap   per-agent raw captures (written by agents)
//! <root>/merged.pcap           chronological merge of all raws
//! <root>/merged.json           decoded form of merged.pcap
//! <root>/filtered.pcap         merged.pcap after the current filter
//! <root>/filtered.json         decoded form of filtered.pcap
//! <root>/filter-config.json    latest submitted filter config
//! <root>/audit.log             append-only audit trail
//! ```
//!
//! Agents only ever write under `raw/`; the coordinator owns everything
//! else. That partition is what makes the area safe without locking.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CaptureError, Result};
use crate::filter::FilterConfig;
use crate::registry::AgentId;

const RAW_DIR: &str = "raw";
const MERGED_CAPTURE: &str = "merged.pcap";
const MERGED_RECORD: &str = "merged.json";
const FILTERED_CAPTURE: &str = "filtered.pcap";
const FILTERED_RECORD: &str = "filtered.json";
const FILTER_CONFIG: &str = "filter-config.json";
const AUDIT_LOG: &str = "audit.log";

/// Handle on the capture store directory.
#[derive(Debug, Clone)]
pub struct CaptureStore {
    root: PathBuf,
}

impl CaptureStore {
    /// Open a store rooted at `root`, creating the layout if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            root: root.as_ref().to_path_buf(),
        };
        fs::create_dir_all(store.raw_dir())
            .map_err(|e| CaptureError::storage(store.raw_dir(), e))?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join(RAW_DIR)
    }

    pub fn raw_capture_path(&self, agent: &AgentId) -> PathBuf {
        self.raw_dir().join(format!("{agent}.pcap"))
    }

    pub fn merged_capture_path(&self) -> PathBuf {
        self.root.join(MERGED_CAPTURE)
    }

    pub fn merged_record_path(&self) -> PathBuf {
        self.root.join(MERGED_RECORD)
    }

    pub fn filtered_capture_path(&self) -> PathBuf {
        self.root.join(FILTERED_CAPTURE)
    }

    pub fn filtered_record_path(&self) -> PathBuf {
        self.root.join(FILTERED_RECORD)
    }

    pub fn filter_config_path(&self) -> PathBuf {
        self.root.join(FILTER_CONFIG)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.root.join(AUDIT_LOG)
    }

    /// Enumerate current raw captures, sorted by file name for stable
    /// ordering. Chronological ordering across files is the merge tool's
    /// job, not ours.
    pub fn raw_captures(&self) -> Result<Vec<PathBuf>> {
        let dir = self.raw_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CaptureError::storage(dir, e)),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CaptureError::storage(&dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("pcap") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    pub fn has_merged_capture(&self) -> bool {
        self.merged_capture_path().is_file()
    }

    /// Remove all raw captures and every derived artifact.
    ///
    /// Called at the start of each capture round. Missing files are fine;
    /// only genuine i/o failures surface.
    pub fn clear_round_artifacts(&self) -> Result<()> {
        for path in self.raw_captures()? {
            remove_if_present(&path)?;
        }
        remove_if_present(&self.merged_capture_path())?;
        remove_if_present(&self.merged_record_path())?;
        self.clear_filter_artifacts()
    }

    /// Remove the filtered capture and its decoded record.
    pub fn clear_filter_artifacts(&self) -> Result<()> {
        remove_if_present(&self.filtered_capture_path())?;
        remove_if_present(&self.filtered_record_path())
    }

    /// Persist `config` as the single latest filter config, replacing any
    /// previous one.
    pub fn save_filter_config(&self, config: &FilterConfig) -> Result<()> {
        let path = self.filter_config_path();
        let json = serde_json::to_string_pretty(config)
            .map_err(|e| CaptureError::storage(&path, std::io::Error::other(e)))?;
        fs::write(&path, json).map_err(|e| CaptureError::storage(&path, e))
    }

    /// Load the persisted filter config, if any.
    pub fn load_filter_config(&self) -> Result<Option<FilterConfig>> {
        let path = self.filter_config_path();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CaptureError::storage(&path, e)),
        };
        let config = serde_json::from_slice(&data)
            .map_err(|e| CaptureError::storage(&path, std::io::Error::other(e)))?;
        Ok(Some(config))
    }

    pub fn clear_filter_config(&self) -> Result<()> {
        remove_if_present(&self.filter_config_path())
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CaptureError::storage(path, e)),
    }
}
