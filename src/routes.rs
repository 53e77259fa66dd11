//! HTTP surface: axum router, query parsing and the error envelope.

use axum::{
    Json, Router,
    extract::{Query, Request, State},
    http::{HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tracing::warn;

use crate::{
    aggregate::{Aggregator, Paged, Suggestions},
    config::DEFAULT_REGION,
    normalize::Item,
    upstream::UpstreamError,
};

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Aggregator,
    pub default_region: String,
}

impl AppState {
    pub fn new(aggregator: Aggregator) -> Self {
        Self {
            aggregator,
            default_region: DEFAULT_REGION.to_string(),
        }
    }

    pub fn with_default_region(mut self, region: impl Into<String>) -> Self {
        self.default_region = region.into();
        self
    }
}

/// Query string shared by all endpoints. Everything arrives as text so a
/// malformed `page` degrades to the default instead of a 400.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub q: Option<String>,
    pub region: Option<String>,
    pub page: Option<String>,
}

impl ListQuery {
    /// Requested page, defaulting to 1 and clamped to at least 1.
    pub fn page(&self) -> u32 {
        self.page
            .as_deref()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .map(|page| page.clamp(1, i64::from(u32::MAX)) as u32)
            .unwrap_or(1)
    }

    pub fn region<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.region
            .as_deref()
            .map(str::trim)
            .filter(|region| !region.is_empty())
            .unwrap_or(fallback)
    }
}

#[derive(Debug)]
pub struct ApiError {
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

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        warn!(%err, status = ?err.status(), "upstream request failed");
        ApiError::internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "items": [],
            "nextPage": null,
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/suggest", get(suggest))
        .route("/v1/trending", get(trending))
        .route("/v1/search", get(search))
        .route("/v1/channels", get(channels))
        .layer(middleware::from_fn(allow_any_origin))
        .with_state(state)
}

pub async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

pub async fn suggest(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Suggestions> {
    Json(state.aggregator.suggest(query.q.as_deref()).await)
}

pub async fn trending(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Paged<Item>>> {
    let region = query.region(&state.default_region);
    let paged = state.aggregator.trending(region, query.page()).await?;
    Ok(Json(paged))
}

pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Paged<Item>>> {
    let paged = state
        .aggregator
        .search(query.q.as_deref(), query.page())
        .await?;
    Ok(Json(paged))
}

pub async fn channels(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Paged<Item>>> {
    let paged = state
        .aggregator
        .channels(query.q.as_deref(), query.page())
        .await?;
    Ok(Json(paged))
}

/// Open CORS policy: every origin may read every endpoint.
async fn allow_any_origin(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        let mut preflight = StatusCode::NO_CONTENT.into_response();
        let headers = preflight.headers_mut();
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("*"),
        );
        preflight
    } else {
        next.run(request).await
    };
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}
