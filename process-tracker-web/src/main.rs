//! process-tracker-web - read-only HTTP/JSON dashboard over the record store.
//!
//! Opens the same data directory a `process-trackerd` instance is writing to
//! and serves it through `QueryApi`. Never writes; safe to run alongside the
//! daemon (spec §5: single writer, many readers).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use clap::Parser;
use process_tracker_core::query::{QueryApi, SortBy};
use process_tracker_core::store::{RecordStore, StoreConfig};
use serde::Deserialize;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::info;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;
const DEFAULT_TOP_N: usize = 20;
const DEFAULT_BUCKETS: usize = 60;

/// process-tracker dashboard server.
#[derive(Parser)]
#[command(name = "process-tracker-web", about = "process-tracker dashboard server", version)]
struct Args {
    /// Listen address.
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Data directory a process-trackerd instance writes to.
    #[arg(long)]
    data_dir: std::path::PathBuf,
}

struct AppState {
    store: RecordStore,
}

#[derive(Deserialize)]
struct ProcessesQuery {
    #[serde(default)]
    sort: Option<String>,
}

fn parse_sort(raw: Option<&str>) -> SortBy {
    match raw {
        Some("memory") => SortBy::Memory,
        Some("name") => SortBy::Name,
        _ => SortBy::Cpu,
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn handle_stats_window(
    State(state): State<Arc<AppState>>,
    axum::extract::Path(window): axum::extract::Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let window_seconds = match window.as_str() {
        "today" => SECONDS_PER_DAY,
        "week" => 7 * SECONDS_PER_DAY,
        "month" => 30 * SECONDS_PER_DAY,
        _ => return Err(StatusCode::NOT_FOUND),
    };
    let api = QueryApi::new(&state.store);
    let snapshot = api.stats(window_seconds, DEFAULT_TOP_N, DEFAULT_BUCKETS);
    Ok(Json(serde_json::to_value(snapshot).unwrap()))
}

async fn handle_live(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let api = QueryApi::new(&state.store);
    Json(serde_json::to_value(api.live()).unwrap())
}

async fn handle_processes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProcessesQuery>,
) -> Json<serde_json::Value> {
    let api = QueryApi::new(&state.store);
    let summaries = api.processes(parse_sort(query.sort.as_deref()), SECONDS_PER_DAY);
    Json(serde_json::to_value(summaries).unwrap())
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "process_tracker_web=info".parse().unwrap()),
        )
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(async_main(args));
}

async fn async_main(args: Args) {
    let store = RecordStore::new(StoreConfig::new(args.data_dir.join("process-tracker.log")))
        .expect("failed to open record store");
    let state = Arc::new(AppState { store });

    let app = Router::new()
        .route("/api/stats/{window}", get(handle_stats_window))
        .route("/api/live", get(handle_live))
        .route("/api/processes", get(handle_processes))
        .route("/api/health", get(handle_health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new());

    let addr: SocketAddr = args.listen.parse().expect("invalid listen address");
    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await.expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
