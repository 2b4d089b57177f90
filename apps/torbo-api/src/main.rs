//! HTTP wire surface for the gateway core: delegation endpoints, node
//! identity, and a live SSE view of the event bus.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use async_stream::stream;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use torbo_crypto::{NodeIdentity, NodeKeyPair};
use torbo_kernel::{KernelBuilder, TorboKernel};
use torbo_protocol::{
    AuditEventRecord, BusEvent, DelegatedTask, DelegatedTaskResult, GatewayConfig,
    NodeCapabilities, ResultResponse, SubmitResponse,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "torbo-api")]
#[command(about = "Torbo Base gateway wire surface")]
struct Cli {
    #[arg(long, default_value = ".torbo")]
    root: PathBuf,
    #[arg(long, default_value = "torbo-node")]
    node_name: String,
    #[arg(long, default_value = "127.0.0.1:8787")]
    listen: SocketAddr,
}

#[derive(Clone)]
struct AppState {
    kernel: TorboKernel,
    public_key_b64: String,
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .init();

    let cli = Cli::parse();

    let config = GatewayConfig::with_data_dir(&cli.root);
    let keypair = NodeKeyPair::load_or_generate(cli.root.join("node.key"))?;
    let public_key_b64 = keypair.public_key_base64();
    let identity = NodeIdentity::new(cli.node_name.as_str(), cli.node_name.as_str(), keypair);

    let kernel = KernelBuilder::new(config)
        .identity(identity)
        .listen(cli.listen.ip().to_string(), cli.listen.port())
        .build()?;
    kernel.initialize().await?;

    let state = AppState {
        kernel: kernel.clone(),
        public_key_b64,
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/delegation/capabilities", post(capabilities))
        .route("/delegation/submit", post(submit_task))
        .route("/delegation/result", post(task_result))
        .route("/community/identity", get(identity_document))
        .route("/events/recent", get(recent_events))
        .route("/events/critical", get(critical_events))
        .route("/events/stream", get(stream_events))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!(listen = %cli.listen, root = %cli.root.display(), "torbo-api listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    kernel.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "torbo-api"
    }))
}

async fn capabilities(State(state): State<AppState>) -> Json<NodeCapabilities> {
    Json(state.kernel.delegation().get_capabilities().await)
}

async fn submit_task(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(task): Json<DelegatedTask>,
) -> Json<SubmitResponse> {
    let sender_ip = peer.ip().to_string();
    Json(
        state
            .kernel
            .delegation()
            .handle_incoming_task(task, &sender_ip)
            .await,
    )
}

async fn task_result(
    State(state): State<AppState>,
    Json(result): Json<DelegatedTaskResult>,
) -> Json<ResultResponse> {
    Json(state.kernel.delegation().handle_task_result(result).await)
}

async fn identity_document(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "public_key": state.public_key_b64 }))
}

#[derive(Debug, Deserialize)]
struct EventQuery {
    limit: Option<usize>,
    pattern: Option<String>,
    topic: Option<String>,
}

async fn recent_events(
    Query(query): Query<EventQuery>,
    State(state): State<AppState>,
) -> Json<Vec<BusEvent>> {
    let limit = query.limit.unwrap_or(100);
    Json(
        state
            .kernel
            .bus()
            .recent_events(limit, query.pattern.as_deref()),
    )
}

async fn critical_events(
    Query(query): Query<EventQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<AuditEventRecord>>> {
    let limit = query.limit.unwrap_or(100);
    let records = state
        .kernel
        .bus()
        .critical_events(limit, query.topic.as_deref())
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(records))
}

/// Live event stream. Each matching bus event arrives as one SSE message
/// carrying the JSON-serialized event; disconnecting detaches the client.
async fn stream_events(
    Query(query): Query<EventQuery>,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let pattern = query.pattern.unwrap_or_else(|| "*".to_owned());
    let client_id = format!("sse-{}", uuid::Uuid::new_v4());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    state
        .kernel
        .bus()
        .add_streaming_client(client_id, pattern, tx);

    let stream = stream! {
        while let Some(line) = rx.recv().await {
            yield Ok(Event::default().event("gateway.event").data(line));
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}
