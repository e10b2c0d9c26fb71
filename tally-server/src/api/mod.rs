//! HTTP API endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tally_core::storage::Storage;
use tally_core::{Metric, MetricKind, TallyError};
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    /// Upper bound on waiting for the storage
    pub request_timeout: Duration,
    /// Cancelled on shutdown; requests still waiting for the storage give up
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>, request_timeout: Duration) -> Self {
        Self {
            storage,
            request_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    /// Per-request storage context
    fn ctx(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Run a storage call under the request timeout.
    /// On timeout the call is dropped, which abandons any wait for the lock.
    async fn run<T, F>(&self, call: F) -> Result<T, ApiError>
    where
        F: Future<Output = tally_core::Result<T>>,
    {
        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| ApiError::Timeout)?
            .map_err(ApiError::Storage)
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health))
        .route("/ping", get(ping))
        // Text API
        .route("/", get(list_metrics))
        .route("/update/:kind/:name/:value", post(update_text))
        .route("/value/:kind/:name", get(value_text))
        // JSON API
        .route("/update", post(update_json))
        .route("/updates", post(updates_json))
        .route("/value", post(value_json))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Request/Response types
// ============================================================================

/// JSON form of a metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricJson {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl From<&Metric> for MetricJson {
    fn from(metric: &Metric) -> Self {
        let (delta, value) = match metric.kind() {
            MetricKind::Counter => (Some(metric.int64()), None),
            MetricKind::Gauge => (None, Some(metric.float64())),
            MetricKind::Unknown => (None, None),
        };
        Self {
            id: metric.name().to_string(),
            kind: metric.kind().to_string(),
            delta,
            value,
        }
    }
}

impl TryFrom<MetricJson> for Metric {
    type Error = TallyError;

    fn try_from(json: MetricJson) -> Result<Self, Self::Error> {
        if json.id.is_empty() {
            return Err(TallyError::InvalidMetric("empty metric id".into()));
        }
        match json.kind.parse::<MetricKind>()? {
            MetricKind::Counter => json
                .delta
                .map(|delta| Metric::counter(json.id.clone(), delta))
                .ok_or_else(|| TallyError::InvalidMetric(format!("counter {} has no delta", json.id))),
            MetricKind::Gauge => match json.value {
                Some(value) if value.is_finite() => Ok(Metric::gauge(json.id, value)),
                Some(_) => Err(TallyError::InvalidMetric(format!(
                    "gauge {} has a non-finite value",
                    json.id
                ))),
                None => Err(TallyError::InvalidMetric(format!("gauge {} has no value", json.id))),
            },
            MetricKind::Unknown => unreachable!("FromStr never yields Unknown"),
        }
    }
}

/// Lookup request for `POST /value`
#[derive(Debug, Deserialize)]
pub struct ValueRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler error, mapped onto a status code
#[derive(Debug)]
pub enum ApiError {
    Storage(TallyError),
    Timeout,
}

impl From<TallyError> for ApiError {
    fn from(e: TallyError) -> Self {
        ApiError::Storage(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::Timeout => (StatusCode::SERVICE_UNAVAILABLE, "storage timed out".to_string()),
            ApiError::Storage(e) => {
                let status = match &e {
                    TallyError::NotFound(_) => StatusCode::NOT_FOUND,
                    TallyError::EmptyInput
                    | TallyError::InvalidMetric(_)
                    | TallyError::Encoding(_)
                    | TallyError::Conflict { .. } => StatusCode::BAD_REQUEST,
                    TallyError::Cancelled | TallyError::StorageClosed => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    tracing::error!(error = %e, "storage request failed");
                }
                (status, e.to_string())
            }
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: tally_core::VERSION.to_string(),
    })
}

async fn ping(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    let ctx = state.ctx();
    state.run(state.storage.ping(&ctx)).await?;
    Ok("pong")
}

async fn list_metrics(State(state): State<AppState>) -> Result<String, ApiError> {
    let ctx = state.ctx();
    let metrics = state.run(state.storage.get_all(&ctx)).await?;

    Ok(metrics
        .iter()
        .map(|m| format!("{} {}\n", m.name(), m))
        .collect())
}

async fn update_text(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<String, ApiError> {
    let metric = Metric::parse(&kind, &name, &value)?;
    let ctx = state.ctx();
    let actual = state.run(state.storage.save(&ctx, vec![metric])).await?;

    Ok(actual.first().map(ToString::to_string).unwrap_or_default())
}

async fn value_text(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let metric = lookup(&state, &kind, &name).await?;
    Ok(metric.to_string())
}

async fn update_json(
    State(state): State<AppState>,
    Json(body): Json<MetricJson>,
) -> Result<Json<MetricJson>, ApiError> {
    let metric = Metric::try_from(body)?;
    let ctx = state.ctx();
    let actual = state.run(state.storage.save(&ctx, vec![metric])).await?;

    let stored = actual.first().cloned().unwrap_or_default();
    Ok(Json(MetricJson::from(&stored)))
}

async fn updates_json(
    State(state): State<AppState>,
    Json(body): Json<Vec<MetricJson>>,
) -> Result<Json<Vec<MetricJson>>, ApiError> {
    let metrics = body
        .into_iter()
        .map(Metric::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    let ctx = state.ctx();
    let actual = state.run(state.storage.save(&ctx, metrics)).await?;

    Ok(Json(actual.iter().map(MetricJson::from).collect()))
}

async fn value_json(
    State(state): State<AppState>,
    Json(body): Json<ValueRequest>,
) -> Result<Json<MetricJson>, ApiError> {
    let metric = lookup(&state, &body.kind, &body.id).await?;
    Ok(Json(MetricJson::from(&metric)))
}

/// Fetch a metric, treating a kind mismatch as absent
async fn lookup(state: &AppState, kind: &str, name: &str) -> Result<Metric, ApiError> {
    let kind: MetricKind = kind.parse()?;
    let ctx = state.ctx();
    let metric = state.run(state.storage.get(&ctx, name)).await?;
    if metric.kind() != kind {
        return Err(TallyError::NotFound(name.to_string()).into());
    }
    Ok(metric)
}
