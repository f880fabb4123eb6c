use std::{fs, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use clap::{Args, Parser, Subcommand};
use graphsync::{
    catalog::Catalog,
    config::{StorageConfig, StreamSchedule, SyncConfig},
    controller::{ControllerState, SyncRunController},
    errors::SyncError,
    models::{LoopStatus, RunLog, SyncCursor},
    GraphSync,
};
use otisfetcher::{OtisFetcher, OtisParams, SubscriptionKeys};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Runs the command line interface of the sync agent.
pub async fn run_cli() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Run(args)) => run_agent(args).await?,
        None => {
            println!("No subcommand provided. Use --help to see available commands.");
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the reconciliation loops and the status HTTP service
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Directory holding the catalog and graph databases
    #[arg(long, env = "SYNCAGENT_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,
    /// Socket address of the status service
    #[arg(long, env = "SYNCAGENT_BIND", default_value = "127.0.0.1:3000")]
    bind: String,
    /// Optional JSON file with the full sync configuration
    #[arg(long, env = "SYNCAGENT_CONFIG")]
    config: Option<PathBuf>,
    /// Telemetry pull interval in milliseconds
    #[arg(long, env = "PULL_INTERVAL")]
    pull_interval: Option<u64>,
    /// Context holding the device network
    #[arg(long, env = "NETWORK_CONTEXT_NAME")]
    network_context: Option<String>,
    /// Skip the cold pass before starting the loops
    #[arg(long, default_value_t = false)]
    skip_init: bool,
    #[command(flatten)]
    otis: OtisArgs,
}

#[derive(Args)]
struct OtisArgs {
    /// Base URL of the vendor API gateway
    #[arg(long, env = "OTIS_BASE_URL")]
    otis_base_url: String,
    #[arg(long, env = "COUNTRY_CODE", default_value = "")]
    country_code: String,
    #[arg(long, env = "CUSTOMER_ID", default_value = "")]
    customer_id: String,
    #[arg(long, env = "CONTRACT_NUMBER", default_value = "")]
    contract_no: String,
    #[arg(long, env = "OTIS_AVAILABILITY_SUBSCRIPTION_KEY", default_value = "")]
    availability_key: String,
    #[arg(long, env = "OTIS_MAINTENANCE_SUBSCRIPTION_KEY", default_value = "")]
    maintenance_key: String,
    #[arg(long, env = "OTIS_REPAIR_SUBSCRIPTION_KEY", default_value = "")]
    repair_key: String,
    #[arg(long, env = "OTIS_CUSTOMER_CALLBACK_SUBSCRIPTION_KEY", default_value = "")]
    customer_callback_key: String,
    #[arg(long, env = "OTIS_ASSETS_SUBSCRIPTION_KEY", default_value = "")]
    assets_key: String,
    #[arg(long, env = "OTIS_PERFORMANCE_SUBSCRIPTION_KEY", default_value = "")]
    performance_key: String,
    #[arg(long, env = "OTIS_STATUS_SUBSCRIPTION_KEY", default_value = "")]
    status_key: String,
    /// HTTP request timeout in seconds
    #[arg(long, env = "OTIS_TIMEOUT_SECS", default_value_t = 30)]
    otis_timeout_secs: u64,
}

impl OtisArgs {
    fn into_params(self) -> OtisParams {
        OtisParams {
            base_url: self.otis_base_url,
            country_code: self.country_code,
            customer_id: self.customer_id,
            contract_no: self.contract_no,
            keys: SubscriptionKeys {
                availability: self.availability_key,
                maintenance: self.maintenance_key,
                repair: self.repair_key,
                customer_callback: self.customer_callback_key,
                assets: self.assets_key,
                performance: self.performance_key,
                status: self.status_key,
            },
            timeout_secs: self.otis_timeout_secs,
            ..OtisParams::default()
        }
    }
}

fn load_sync_config(args: &RunArgs) -> anyhow::Result<SyncConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            SyncConfig::from_json(&raw)?
        }
        None => SyncConfig::default(),
    };
    if let Some(interval_ms) = args.pull_interval {
        config.schedules.telemetry = StreamSchedule::every(interval_ms);
    }
    if let Some(network) = &args.network_context {
        config.network_context = network.clone();
    }
    config.validate()?;
    Ok(config)
}

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<SyncRunController>,
    pub catalog: Arc<Catalog>,
}

impl AppState {
    pub fn new(controller: Arc<SyncRunController>, catalog: Arc<Catalog>) -> Self {
        Self {
            controller,
            catalog,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<SyncError> for ApiError {
    fn from(value: SyncError) -> Self {
        match value {
            SyncError::Config(msg) | SyncError::InvalidState(msg) => ApiError::BadRequest(msg),
            SyncError::NotFound(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct StatusResponse {
    state: ControllerState,
    loops: Vec<LoopStatus>,
}

#[derive(Serialize)]
struct MappingResponse {
    built: bool,
    count: usize,
    keys: Vec<String>,
}

#[derive(Deserialize)]
struct RunsQuery {
    stream: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

const DEFAULT_RUNS_LIMIT: usize = 20;
const MAX_RUNS_LIMIT: usize = 500;

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

async fn run_agent(args: RunArgs) -> anyhow::Result<()> {
    let addr: SocketAddr = args.bind.parse().context("failed to parse bind address")?;
    let sync_config = load_sync_config(&args)?;

    let storage = GraphSync::new(StorageConfig::new(&args.data_dir))
        .await
        .context("failed to open storage")?;
    let fetcher = OtisFetcher::with_default_client(args.otis.into_params())
        .context("failed to configure the vendor API client")?;
    let controller = Arc::new(storage.controller(sync_config, Arc::new(fetcher))?);

    if args.skip_init {
        info!("Skipping initial pass");
    } else {
        match controller.init().await {
            Ok(report) => {
                for (stream, stats) in report {
                    info!(
                        "Initial pass of '{}': {} processed, {} created, {} skipped, {} failed",
                        stream, stats.processed, stats.created, stats.skipped, stats.failed
                    );
                }
            }
            Err(err) => {
                error!("Initial pass failed, loops will retry: {}", err);
            }
        }
    }
    controller.start()?;

    let state = AppState::new(Arc::clone(&controller), Arc::clone(&storage.catalog));
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind status listener")?;

    info!("Status service listening on {}", addr);
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("status server error");

    controller.stop();
    controller.join().await;
    info!("All sync loops stopped");
    served
}

/// Builds the HTTP router of the status service.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/mapping", get(get_mapping))
        .route("/api/cursors", get(list_cursors))
        .route("/api/runs", get(list_runs))
        .with_state(state)
}

async fn get_status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    Ok(Json(StatusResponse {
        state: state.controller.state(),
        loops: state.controller.statuses(),
    }))
}

async fn get_mapping(State(state): State<AppState>) -> ApiResult<Json<MappingResponse>> {
    let mapper = state.controller.mapper();
    Ok(Json(MappingResponse {
        built: mapper.is_built(),
        count: mapper.len(),
        keys: mapper.keys(),
    }))
}

async fn list_cursors(State(state): State<AppState>) -> ApiResult<Json<Vec<SyncCursor>>> {
    Ok(Json(state.catalog.list_cursors()?))
}

async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> ApiResult<Json<Vec<RunLog>>> {
    let stream = query
        .stream
        .filter(|stream| !stream.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("query parameter 'stream' is required".into()))?;
    let limit = query.limit.unwrap_or(DEFAULT_RUNS_LIMIT);
    if limit == 0 || limit > MAX_RUNS_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {MAX_RUNS_LIMIT}"
        )));
    }
    Ok(Json(state.catalog.recent_runs(&stream, limit)?))
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", err);
        return;
    }
    info!("Shutdown signal received");
}
