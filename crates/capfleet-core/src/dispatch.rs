//! Start/stop fan-out to the capture fleet.
//!
//! One concurrent control call per registered agent; the broadcast settles
//! only when every call has settled. Per-agent failures are outcomes, not
//! errors: a broadcast over a non-empty fleet never fails, even if every
//! agent refuses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CaptureError, Result};
use crate::registry::AgentId;

/// Control signal delivered to an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSignal {
    Start,
    Stop,
}

impl CaptureSignal {
    fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

/// Transport seam for the agent-side control surface.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Deliver one signal to one agent. `Err` carries a human-readable
    /// reason; it is recorded, never retried.
    async fn signal(&self, agent: &AgentId, signal: CaptureSignal)
        -> std::result::Result<(), String>;
}

/// Per-agent dispatch result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub identity: AgentId,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentOutcome {
    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Fans control signals out across the fleet.
pub struct Dispatcher {
    transport: Arc<dyn AgentTransport>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn AgentTransport>) -> Self {
        Self { transport }
    }

    pub async fn broadcast_start(&self, agents: &[AgentId]) -> Result<Vec<AgentOutcome>> {
        self.broadcast(agents, CaptureSignal::Start).await
    }

    pub async fn broadcast_stop(&self, agents: &[AgentId]) -> Result<Vec<AgentOutcome>> {
        self.broadcast(agents, CaptureSignal::Stop).await
    }

    /// Issue `signal` to every agent concurrently and join over all
    /// outcomes. Errors only when `agents` is empty.
    async fn broadcast(
        &self,
        agents: &[AgentId],
        signal: CaptureSignal,
    ) -> Result<Vec<AgentOutcome>> {
        if agents.is_empty() {
            return Err(CaptureError::NoAgentsRegistered);
        }

        let calls = agents.iter().map(|agent| {
            let transport = Arc::clone(&self.transport);
            let agent = agent.clone();
            async move {
                match transport.signal(&agent, signal).await {
                    Ok(()) => {
                        debug!(agent = %agent, signal = signal.as_str(), "agent acknowledged");
                        AgentOutcome {
                            identity: agent,
                            outcome: Outcome::Success,
                            error: None,
                        }
                    }
                    Err(reason) => {
                        warn!(agent = %agent, signal = signal.as_str(), %reason, "agent call failed");
                        AgentOutcome {
                            identity: agent,
                            outcome: Outcome::Failed,
                            error: Some(reason),
                        }
                    }
                }
            }
        });

        Ok(join_all(calls).await)
    }
}

/// HTTP transport: each agent exposes `POST /start` and `POST /stop` on a
/// fixed control port, reachable at its registered identity.
pub struct HttpAgentTransport {
    client: reqwest::Client,
    control_port: u16,
}

impl HttpAgentTransport {
    pub fn new(control_port: u16, call_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            control_port,
        }
    }

    fn url(&self, agent: &AgentId, signal: CaptureSignal) -> String {
        format!("http://{}:{}/{}", agent, self.control_port, signal.as_str())
    }
}

#[async_trait]
impl AgentTransport for HttpAgentTransport {
    async fn signal(
        &self,
        agent: &AgentId,
        signal: CaptureSignal,
    ) -> std::result::Result<(), String> {
        let url = self.url(agent, signal);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| format!("request to {url} failed: {e}"))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("agent returned {}", response.status()))
        }
    }
}
