//! Route table and handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Router,
    extract::{Query, Request, State, rejection::QueryRejection},
    http::{Method, Uri},
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::auth;
use crate::config::{Config, CorsOrigins};
use crate::envelope::Envelope;
use crate::error::{DetailedError, GatewayError};
use crate::executor::{CommandExecutor, Period, ToolQuery};
use crate::normalize::{self, InterfaceSummary, LiveSample, TrafficSnapshot};

pub const SERVICE_NAME: &str = "vnstat-gateway";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub executor: Arc<CommandExecutor>,
    pub host_name: Option<String>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let executor = Arc::new(CommandExecutor::new(&config));
        let host_name = hostname::get()
            .ok()
            .map(|h| h.to_string_lossy().into_owned());
        Self {
            config: Arc::new(config),
            executor,
            host_name,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/traffic", get(traffic))
        .route("/traffic/realtime", get(realtime))
        .route("/traffic/history", get(history))
        .route("/interfaces", get(interfaces))
        .route("/status", get(status))
        .route_layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth::require_api_key,
        ));

    let mut router = Router::new()
        .route("/", get(liveness))
        .merge(protected)
        .fallback(not_found);
    if let Some(cors) = cors_layer(&state.config.cors_origins) {
        router = router.layer(cors);
    }
    router
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

/// `None` when no origin is allowed, so responses carry no CORS headers.
fn cors_layer(origins: &CorsOrigins) -> Option<CorsLayer> {
    let allow_origin = match origins {
        CorsOrigins::Any => AllowOrigin::from(Any),
        CorsOrigins::List(list) if list.is_empty() => return None,
        CorsOrigins::List(list) => AllowOrigin::list(list.iter().cloned()),
    };
    Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET])
            .allow_headers(Any)
            .max_age(Duration::from_secs(600)),
    )
}

async fn not_found(uri: Uri) -> GatewayError {
    GatewayError::NotFound(uri.path().to_string())
}

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;
    log::info!(
        "{method} {path} -> {} in {}ms",
        response.status().as_u16(),
        started.elapsed().as_millis()
    );
    response
}

#[derive(Debug, Serialize)]
pub struct Liveness {
    pub service: &'static str,
    pub version: &'static str,
    pub state: &'static str,
    pub host: Option<String>,
}

async fn liveness(State(state): State<AppState>) -> Envelope<Liveness> {
    Envelope::success(Liveness {
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        state: "running",
        host: state.host_name.clone(),
    })
}

async fn snapshot(executor: &CommandExecutor, query: ToolQuery) -> Result<TrafficSnapshot, GatewayError> {
    let output = executor.run(query).await?;
    normalize::normalize_snapshot(&output.stdout)
}

async fn traffic(State(state): State<AppState>) -> Result<Envelope<TrafficSnapshot>, GatewayError> {
    let snapshot = snapshot(&state.executor, ToolQuery::Snapshot).await?;
    Ok(Envelope::success(snapshot))
}

async fn realtime(State(state): State<AppState>) -> Result<Envelope<LiveSample>, GatewayError> {
    let output = state.executor.run(ToolQuery::LiveSample).await?;
    let sample = normalize::normalize_sample(&output.stdout)?;
    Ok(Envelope::success(sample))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub period: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryView {
    pub period: Period,
    #[serde(flatten)]
    pub snapshot: TrafficSnapshot,
}

async fn history(
    State(state): State<AppState>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Envelope<HistoryView>, GatewayError> {
    let Query(params) =
        params.map_err(|e| GatewayError::InvalidParameter(e.body_text()))?;
    let period = match params.period.as_deref() {
        None => Period::default(),
        Some(raw) => raw.parse::<Period>()?,
    };

    let snapshot = snapshot(&state.executor, ToolQuery::History(period)).await?;
    Ok(Envelope::success(HistoryView { period, snapshot }))
}

async fn interfaces(
    State(state): State<AppState>,
) -> Result<Envelope<Vec<InterfaceSummary>>, GatewayError> {
    let snapshot = snapshot(&state.executor, ToolQuery::Snapshot).await?;
    Ok(Envelope::success(normalize::summarize(&snapshot)))
}

#[derive(Debug, Serialize)]
pub struct ToolStatus {
    pub service: &'static str,
    pub vnstat_status: &'static str,
    pub vnstat_version: Option<String>,
}

async fn status(State(state): State<AppState>) -> Result<Envelope<ToolStatus>, DetailedError> {
    match state.executor.run(ToolQuery::Version).await {
        Ok(output) => Ok(Envelope::success(ToolStatus {
            service: "running",
            vnstat_status: "available",
            vnstat_version: normalize::tool_version(&output.stdout),
        })),
        Err(GatewayError::ServiceBusy) => Err(GatewayError::ServiceBusy.into()),
        Err(err) => Err(err.with_detail("vnstat_status", "unavailable")),
    }
}
