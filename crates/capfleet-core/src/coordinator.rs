//! Top-level coordinator: registry + dispatcher + pipeline wired into the
//! operation surface exposed to operators and agents.
//!
//! The coordinator's state is advisory. It tracks whether a round is
//! believed to be in flight but never verifies agent liveness; stop always
//! returns to `Idle` whatever the pipeline did.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::audit::AuditSink;
use crate::dispatch::{AgentOutcome, Dispatcher};
use crate::error::{CaptureError, Result};
use crate::filter::{compile, FilterConfig};
use crate::obs;
use crate::pipeline::{DecodedRecord, FilterOutcome, Pipeline};
use crate::registry::{AgentId, AgentRegistry};

/// Default grace wait between stop fan-out and merge.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Advisory coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorState {
    Idle,
    Capturing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAck {
    pub received: AgentId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartReport {
    pub outcomes: Vec<AgentOutcome>,
}

/// Result of a stop cycle. `record` carries the filtered record when
/// filtering ran and succeeded, otherwise the raw decoded record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopReport {
    pub outcomes: Vec<AgentOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<DecodedRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigReport {
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filtered_record: Option<DecodedRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetAck {
    pub cleaned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub reachable: bool,
    pub state: CoordinatorState,
    pub agents: usize,
}

/// Single-process capture coordinator.
pub struct Coordinator {
    registry: Mutex<AgentRegistry>,
    dispatcher: Dispatcher,
    pipeline: Pipeline,
    audit: Arc<dyn AuditSink>,
    state: Mutex<CoordinatorState>,
    // Serializes start/stop/config bodies; two overlapping stop cycles
    // would race on the merged/filtered artifact paths.
    round_lock: tokio::sync::Mutex<()>,
    grace: Duration,
}

impl Coordinator {
    pub fn new(
        dispatcher: Dispatcher,
        pipeline: Pipeline,
        audit: Arc<dyn AuditSink>,
        grace: Duration,
    ) -> Self {
        Self {
            registry: Mutex::new(AgentRegistry::new()),
            dispatcher,
            pipeline,
            audit,
            state: Mutex::new(CoordinatorState::Idle),
            round_lock: tokio::sync::Mutex::new(()),
            grace,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.lock().expect("state lock poisoned")
    }

    fn set_state(&self, state: CoordinatorState) {
        *self.state.lock().expect("state lock poisoned") = state;
    }

    fn agents(&self) -> Vec<AgentId> {
        self.registry.lock().expect("registry lock poisoned").list()
    }

    /// Agent self-registration. Idempotent; never fails.
    pub fn register(&self, identity: impl Into<String>) -> RegisterAck {
        let id = AgentId::new(identity);
        let newly_added = self
            .registry
            .lock()
            .expect("registry lock poisoned")
            .register(id.clone());

        obs::emit_agent_registered(id.as_str(), newly_added);
        self.audit.append(
            "agent.registered",
            &format!("{id} (newly_added={newly_added})"),
            true,
        );
        RegisterAck { received: id }
    }

    /// Begin a capture round: clear artifacts, fan out start signals.
    ///
    /// Succeeds whenever at least one agent is registered, regardless of
    /// per-agent dispatch outcomes. Does not wait for capture to begin.
    pub async fn start(&self) -> Result<StartReport> {
        let agents = self.agents();
        if agents.is_empty() {
            self.audit.append("round.started", "no agents registered", false);
            return Err(CaptureError::NoAgentsRegistered);
        }

        let _round = self.round_lock.lock().await;

        self.pipeline.clear_capture_artifacts()?;
        let outcomes = self.dispatcher.broadcast_start(&agents).await?;

        self.set_state(CoordinatorState::Capturing);
        obs::emit_round_started(agents.len());
        self.audit
            .append("round.started", &format!("{} agents", agents.len()), true);

        Ok(StartReport { outcomes })
    }

    /// End the capture round: fan out stop, wait the grace period, then
    /// merge, decode, and (when a config is persisted) filter.
    ///
    /// A merge failure fails the whole operation. Decode or filter
    /// failures after a successful merge degrade the report instead: the
    /// stop signals were already delivered and are reported as such.
    pub async fn stop(&self) -> Result<StopReport> {
        let agents = self.agents();
        if agents.is_empty() {
            self.audit.append("round.stopped", "no agents registered", false);
            return Err(CaptureError::NoAgentsRegistered);
        }

        let _round = self.round_lock.lock().await;

        let outcomes = self.dispatcher.broadcast_stop(&agents).await?;
        let delivered = outcomes.iter().filter(|o| o.succeeded()).count();

        // Agents may flush their raw capture shortly after acknowledging.
        info!(event = "round.grace_wait", seconds = self.grace.as_secs_f64());
        tokio::time::sleep(self.grace).await;

        self.set_state(CoordinatorState::Idle);
        obs::emit_round_stopped(agents.len(), delivered);
        self.audit.append(
            "round.stopped",
            &format!("{delivered}/{} stop signals delivered", agents.len()),
            true,
        );

        let merged = self.pipeline.merge().await?;

        let record = match self
            .pipeline
            .decode(&merged, &self.pipeline.store().merged_record_path())
            .await
        {
            Ok(record) => record,
            Err(e) => {
                return Ok(StopReport {
                    outcomes,
                    record: None,
                    filter_status: None,
                    error: Some(e.to_string()),
                });
            }
        };

        let config = match self.pipeline.store().load_filter_config() {
            Ok(config) => config,
            Err(e) => {
                return Ok(StopReport {
                    outcomes,
                    record: Some(record),
                    filter_status: None,
                    error: Some(e.to_string()),
                });
            }
        };

        let Some(config) = config else {
            return Ok(StopReport {
                outcomes,
                record: Some(record),
                filter_status: None,
                error: None,
            });
        };

        match self.pipeline.filter(&compile(&config)).await {
            FilterOutcome::Ok { record: filtered } => Ok(StopReport {
                outcomes,
                record: Some(filtered),
                filter_status: Some("ok".to_string()),
                error: None,
            }),
            FilterOutcome::Ko { error } => Ok(StopReport {
                outcomes,
                record: Some(record),
                filter_status: Some("ko".to_string()),
                error: Some(error),
            }),
        }
    }

    /// Replace the persisted filter config and, when a merged capture from
    /// a prior round exists, re-filter it immediately.
    pub async fn submit_config(&self, config: FilterConfig) -> Result<ConfigReport> {
        let _round = self.round_lock.lock().await;

        self.pipeline.store().save_filter_config(&config)?;
        obs::emit_config_replaced(config.0.len());
        self.audit
            .append("config.replaced", &format!("{} fields", config.0.len()), true);

        if !self.pipeline.store().has_merged_capture() {
            return Ok(ConfigReport {
                persisted: true,
                filtered_record: None,
                filter_status: None,
                error: None,
            });
        }

        match self.pipeline.filter(&compile(&config)).await {
            FilterOutcome::Ok { record } => Ok(ConfigReport {
                persisted: true,
                filtered_record: Some(record),
                filter_status: Some("ok".to_string()),
                error: None,
            }),
            FilterOutcome::Ko { error } => Ok(ConfigReport {
                persisted: true,
                filtered_record: None,
                filter_status: Some("ko".to_string()),
                error: Some(error),
            }),
        }
    }

    /// Remove the persisted config and filtered artifacts. Raw and merged
    /// captures are untouched.
    pub async fn reset(&self) -> Result<ResetAck> {
        let _round = self.round_lock.lock().await;

        self.pipeline.store().clear_filter_config()?;
        self.pipeline.store().clear_filter_artifacts()?;
        self.audit.append("config.reset", "filter config and artifacts removed", true);
        Ok(ResetAck { cleaned: true })
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            reachable: true,
            state: self.state(),
            agents: self.registry.lock().expect("registry lock poisoned").len(),
        }
    }
}
