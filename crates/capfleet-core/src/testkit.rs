//! Test support: scripted fakes for the external toolchain and the agent
//! transport.
//!
//! Lives in the library (not behind `cfg(test)`) so the integration suites
//! under `tests/` can drive the coordinator without mergecap/tshark or a
//! real fleet.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::dispatch::{AgentTransport, CaptureSignal};
use crate::error::{CaptureError, Result};
use crate::registry::AgentId;
use crate::tools::{ToolOutput, ToolRunner};

/// Fake mergecap/tshark with a tiny deterministic capture model:
///
/// * merge concatenates the raw input bytes into the output file
/// * decode emits one JSON packet object per input byte
/// * filter writes `<expression>:<input bytes>` to the output file
#[derive(Default)]
pub struct FakeCaptureTools {
    fail_merge: Option<String>,
    fail_filter: Option<String>,
    filter_writes_nothing: bool,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeCaptureTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_merge(mut self, message: &str) -> Self {
        self.fail_merge = Some(message.to_string());
        self
    }

    pub fn failing_filter(mut self, message: &str) -> Self {
        self.fail_filter = Some(message.to_string());
        self
    }

    /// Filter invocations succeed but leave no output artifact behind.
    pub fn filter_writes_nothing(mut self) -> Self {
        self.filter_writes_nothing = true;
        self
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    fn merge(&self, args: &[String]) -> Result<ToolOutput> {
        if let Some(message) = &self.fail_merge {
            return Err(CaptureError::tool("mergecap", message.clone()));
        }
        let output = PathBuf::from(&args[1]);
        let mut combined = Vec::new();
        for input in &args[2..] {
            let data = fs::read(input)
                .map_err(|e| CaptureError::tool("mergecap", format!("read {input}: {e}")))?;
            combined.extend(data);
        }
        fs::write(&output, combined).map_err(|e| CaptureError::storage(&output, e))?;
        Ok(ToolOutput::default())
    }

    fn decode(&self, args: &[String]) -> Result<ToolOutput> {
        let capture = PathBuf::from(&args[1]);
        let data = fs::read(&capture)
            .map_err(|e| CaptureError::tool("tshark", format!("read {}: {e}", capture.display())))?;
        let packets: Vec<_> = data
            .iter()
            .enumerate()
            .map(|(i, byte)| json!({ "frame": i, "byte": byte }))
            .collect();
        Ok(ToolOutput {
            stdout: serde_json::to_vec(&packets).expect("fake decode output"),
            stderr: String::new(),
        })
    }

    fn filter(&self, args: &[String]) -> Result<ToolOutput> {
        if let Some(message) = &self.fail_filter {
            return Err(CaptureError::tool("tshark", message.clone()));
        }
        if self.filter_writes_nothing {
            return Ok(ToolOutput::default());
        }
        let input = PathBuf::from(&args[1]);
        let expression = &args[3];
        let output = PathBuf::from(&args[5]);
        let data = fs::read(&input)
            .map_err(|e| CaptureError::tool("tshark", format!("read {}: {e}", input.display())))?;
        let mut filtered = expression.as_bytes().to_vec();
        filtered.push(b':');
        filtered.extend(data);
        fs::write(&output, filtered).map_err(|e| CaptureError::storage(&output, e))?;
        Ok(ToolOutput::default())
    }
}

#[async_trait]
impl ToolRunner for FakeCaptureTools {
    async fn run(&self, program: &str, args: &[String]) -> Result<ToolOutput> {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push((program.to_string(), args.to_vec()));

        if args.first().map(String::as_str) == Some("-w") {
            self.merge(args)
        } else if args.contains(&"-Y".to_string()) {
            self.filter(args)
        } else {
            self.decode(args)
        }
    }
}

/// Transport whose agents all accept, except a configured failing set.
/// Optionally writes a raw capture file on stop, standing in for the
/// agent-side flush to shared storage.
#[derive(Default)]
pub struct FakeFleet {
    failing: Vec<String>,
    raw_dir: Option<PathBuf>,
    signals: Mutex<Vec<(String, CaptureSignal)>>,
}

impl FakeFleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_agent(mut self, identity: &str) -> Self {
        self.failing.push(identity.to_string());
        self
    }

    /// On stop, write `<raw_dir>/<identity>.pcap` with the agent's identity
    /// as payload, mimicking the agent's own capture flush.
    pub fn flushing_to(mut self, raw_dir: PathBuf) -> Self {
        self.raw_dir = Some(raw_dir);
        self
    }

    pub fn signals(&self) -> Vec<(String, CaptureSignal)> {
        self.signals.lock().expect("signals lock poisoned").clone()
    }
}

#[async_trait]
impl AgentTransport for FakeFleet {
    async fn signal(
        &self,
        agent: &AgentId,
        signal: CaptureSignal,
    ) -> std::result::Result<(), String> {
        self.signals
            .lock()
            .expect("signals lock poisoned")
            .push((agent.to_string(), signal));

        if self.failing.iter().any(|f| f == agent.as_str()) {
            return Err("agent refused".to_string());
        }

        if signal == CaptureSignal::Stop {
            if let Some(dir) = &self.raw_dir {
                let path = dir.join(format!("{agent}.pcap"));
                fs::write(&path, agent.as_str().as_bytes())
                    .map_err(|e| format!("flush failed: {e}"))?;
            }
        }

        Ok(())
    }
}
