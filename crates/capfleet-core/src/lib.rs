//! Capfleet core library
//!
//! Control plane for distributed packet capture: agent registry, start/stop
//! fan-out with partial-failure tolerance, capture merge/decode, and a
//! declarative filter-config compiler with idempotent re-filtering.

pub mod audit;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod obs;
pub mod pipeline;
pub mod registry;
pub mod store;
pub mod telemetry;
pub mod testkit;
pub mod tools;

pub use audit::{AuditEntry, AuditSink, FileAuditSink, MemoryAuditSink};
pub use coordinator::{
    ConfigReport, Coordinator, CoordinatorState, HealthReport, RegisterAck, ResetAck, StartReport,
    StopReport, DEFAULT_GRACE,
};
pub use dispatch::{
    AgentOutcome, AgentTransport, CaptureSignal, Dispatcher, HttpAgentTransport, Outcome,
};
pub use error::{CaptureError, Result};
pub use filter::{compile, FilterConfig, CLAUSE_ORDER};
pub use pipeline::{DecodedRecord, FilterOutcome, Pipeline};
pub use registry::{AgentId, AgentRegistry};
pub use store::CaptureStore;
pub use telemetry::init_tracing;
pub use tools::{CaptureToolchain, SystemToolRunner, ToolOutput, ToolRunner};

/// Capfleet version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
