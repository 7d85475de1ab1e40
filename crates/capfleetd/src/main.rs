//! Capfleet coordinator daemon.
//!
//! Hosts the operator/agent-facing HTTP surface over a single in-process
//! [`Coordinator`]: agent registration, capture round start/stop, filter
//! config submission and reset, and a health probe.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, Level};

use capfleet_core::{
    CaptureError, CaptureStore, CaptureToolchain, Coordinator, Dispatcher, FileAuditSink,
    FilterConfig, HttpAgentTransport, Pipeline, SystemToolRunner,
};

#[derive(Parser)]
#[command(name = "capfleetd")]
#[command(version = capfleet_core::VERSION)]
#[command(about = "Distributed packet capture coordinator", long_about = None)]
struct Args {
    /// Address to serve the control API on
    #[arg(long, env = "CAPFLEET_LISTEN", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Capture store directory (shared with agents)
    #[arg(long, env = "CAPFLEET_STORE", default_value = "/var/lib/capfleet")]
    store: PathBuf,

    /// Control port agents listen on
    #[arg(long, env = "CAPFLEET_AGENT_PORT", default_value_t = 9800)]
    agent_port: u16,

    /// Seconds to wait after stop fan-out before merging
    #[arg(long, default_value_t = capfleet_core::DEFAULT_GRACE.as_secs())]
    grace_secs: u64,

    /// Merge tool binary
    #[arg(long, default_value = "mergecap")]
    merge_bin: String,

    /// Decode/filter tool binary
    #[arg(long, default_value = "tshark")]
    decode_bin: String,

    /// Upper bound on a single tool invocation, in seconds
    #[arg(long, default_value_t = 120)]
    tool_timeout_secs: u64,

    /// Per-agent control call timeout, in seconds
    #[arg(long, default_value_t = 10)]
    agent_timeout_secs: u64,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    identity: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

type AppState = Arc<Coordinator>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    capfleet_core::init_tracing(args.json, level);

    info!(
        version = capfleet_core::VERSION,
        store = %args.store.display(),
        "starting capfleetd"
    );

    let store = CaptureStore::open(&args.store)
        .with_context(|| format!("opening capture store at {}", args.store.display()))?;
    let audit = Arc::new(FileAuditSink::new(store.audit_log_path()));

    let toolchain = CaptureToolchain {
        merge_bin: args.merge_bin,
        decode_bin: args.decode_bin,
        timeout: Duration::from_secs(args.tool_timeout_secs),
    };
    let runner = Arc::new(SystemToolRunner::new(toolchain.timeout));
    let pipeline = Pipeline::new(store, toolchain, runner, audit.clone());

    let transport = HttpAgentTransport::new(
        args.agent_port,
        Duration::from_secs(args.agent_timeout_secs),
    );
    let dispatcher = Dispatcher::new(Arc::new(transport));

    let coordinator = Arc::new(Coordinator::new(
        dispatcher,
        pipeline,
        audit,
        Duration::from_secs(args.grace_secs),
    ));

    let router = build_router(coordinator);

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!(listen = %args.listen, "control API ready");

    axum::serve(listener, router).await.context("server error")
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/config", post(submit_config))
        .route("/config", delete(reset_config))
        .route("/health", get(health))
        .with_state(state)
}

async fn register(
    State(coordinator): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> impl IntoResponse {
    Json(coordinator.register(request.identity))
}

async fn start(State(coordinator): State<AppState>) -> Response {
    match coordinator.start().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}

async fn stop(State(coordinator): State<AppState>) -> Response {
    match coordinator.stop().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}

async fn submit_config(
    State(coordinator): State<AppState>,
    Json(config): Json<FilterConfig>,
) -> Response {
    match coordinator.submit_config(config).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}

async fn reset_config(State(coordinator): State<AppState>) -> Response {
    match coordinator.reset().await {
        Ok(ack) => Json(ack).into_response(),
        Err(e) => error_response(e),
    }
}

async fn health(State(coordinator): State<AppState>) -> impl IntoResponse {
    Json(coordinator.health())
}

fn error_response(err: CaptureError) -> Response {
    let status = match err {
        CaptureError::NoAgentsRegistered => StatusCode::CONFLICT,
        CaptureError::NoCapturesToMerge => StatusCode::NOT_FOUND,
        CaptureError::ToolInvocationFailed { .. }
        | CaptureError::FilterOutputMissing { .. }
        | CaptureError::StorageIo { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}
