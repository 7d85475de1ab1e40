//! Structured observability events for the capture round lifecycle.
//!
//! Events are emitted at `info!` level with an `event = "..."` field,
//! filterable via `RUST_LOG`. For JSON output, pass `--json` to the daemon.

use std::path::Path;

use tracing::info;

/// Emit event: a new capture round started across `agents` agents.
pub fn emit_round_started(agents: usize) {
    info!(event = "round.started", agents = agents);
}

/// Emit event: a capture round stopped; `delivered` of `agents` stop
/// signals were acknowledged.
pub fn emit_round_stopped(agents: usize, delivered: usize) {
    info!(event = "round.stopped", agents = agents, delivered = delivered);
}

/// Emit event: an agent registered (or re-registered).
pub fn emit_agent_registered(identity: &str, newly_added: bool) {
    info!(event = "agent.registered", identity = %identity, newly_added = newly_added);
}

/// Emit event: merge completed over `inputs` raw captures.
pub fn emit_merge_completed(inputs: usize) {
    info!(event = "pipeline.merged", inputs = inputs);
}

/// Emit event: decode completed.
pub fn emit_decode_completed(capture: &Path, packets: usize) {
    info!(event = "pipeline.decoded", capture = %capture.display(), packets = packets);
}

/// Emit event: filter completed with the given status (`ok`/`ko`).
pub fn emit_filter_completed(expression: &str, status: &str) {
    info!(event = "pipeline.filtered", expression = %expression, status = %status);
}

/// Emit event: filter config replaced.
pub fn emit_config_replaced(fields: usize) {
    info!(event = "config.replaced", fields = fields);
}
