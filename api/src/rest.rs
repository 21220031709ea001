use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::error;

use crate::auth::{api_key_middleware, Owner};
use crate::errors::Error;
use crate::filter::ReadingFilter;
use crate::metrics;
use crate::model::{DeviceView, NewReading, Pager, Reading, ReadingView};
use crate::query::QueryEngine;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::stats::Statistic;
use crate::store::{DeviceStore, IdentityResolver};
use crate::validate::page_params;
use crate::write::WriteCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub queries: Arc<QueryEngine>,
    pub writes: Arc<WriteCoordinator>,
    pub devices: Arc<dyn DeviceStore>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    page: Option<usize>,
    size: Option<usize>,
}

/// Filter fields plus paging, flat so every value parses from the query
/// string on its own.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteredQuery {
    year: Option<i32>,
    month: Option<u32>,
    day: Option<u32>,
    hour: Option<u32>,
    start_timestamp: Option<i64>,
    end_timestamp: Option<i64>,
    device_name: Option<String>,
    device_id: Option<String>,
    location: Option<String>,
    page: Option<usize>,
    size: Option<usize>,
}

impl FilteredQuery {
    fn filter(&self) -> ReadingFilter {
        ReadingFilter {
            year: self.year,
            month: self.month,
            day: self.day,
            hour: self.hour,
            start_timestamp: self.start_timestamp,
            end_timestamp: self.end_timestamp,
            device_name: self.device_name.clone(),
            device_id: self.device_id.clone(),
            location: self.location.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LatestView {
    #[serde(flatten)]
    reading: ReadingView,
    formatted_timestamp: String,
}

pub fn create_router(
    state: AppState,
    identities: Arc<dyn IdentityResolver>,
    limiter: Arc<RateLimiter>,
) -> Router {
    let protected = Router::new()
        .route("/temperatures", get(list_readings).post(create_reading))
        .route("/temperatures/filtered", get(filtered_readings))
        .route("/temperatures/latest", get(latest_reading))
        .route("/temperatures/average", get(average))
        .route("/temperatures/min", get(min))
        .route("/temperatures/max", get(max))
        .route("/temperatures/median", get(median))
        .route(
            "/temperatures/:id",
            get(get_reading).delete(delete_reading),
        )
        .route("/devices", get(list_devices))
        .route("/devices/:id", get(get_device))
        .route_layer(middleware::from_fn_with_state(identities, api_key_middleware))
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .merge(protected)
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
}

async fn create_reading(
    State(state): State<AppState>,
    Extension(Owner(owner)): Extension<Owner>,
    Json(body): Json<NewReading>,
) -> Result<(StatusCode, Json<ReadingView>), AppError> {
    let reading = state.writes.create(&body, &owner).await?;
    Ok((StatusCode::CREATED, Json(ReadingView::from(&reading))))
}

async fn list_readings(
    State(state): State<AppState>,
    Extension(Owner(owner)): Extension<Owner>,
    Query(params): Query<PageQuery>,
) -> Result<Json<Value>, AppError> {
    let (page, size) = page_params(params.page, params.size)?;
    let listing = state.queries.all(page, size, &owner).await?;

    let links = page_links("/temperatures", &[], page, size, listing.pager);
    Ok(Json(collection(&listing.readings, links)))
}

async fn filtered_readings(
    State(state): State<AppState>,
    Extension(Owner(owner)): Extension<Owner>,
    Query(params): Query<FilteredQuery>,
) -> Result<Json<Value>, AppError> {
    let (page, size) = page_params(params.page, params.size)?;
    let filter = params.filter();
    let result = state.queries.filtered(&filter, page, size, &owner).await?;

    let links = page_links(
        "/temperatures/filtered",
        &filter.query_pairs(),
        page,
        size,
        Some(result.pager),
    );
    Ok(Json(collection(&result.readings, links)))
}

async fn get_reading(
    State(state): State<AppState>,
    Extension(Owner(owner)): Extension<Owner>,
    Path(id): Path<String>,
) -> Result<Json<ReadingView>, AppError> {
    let reading = state.queries.one(&id, &owner).await?;
    Ok(Json(ReadingView::from(&reading)))
}

async fn delete_reading(
    State(state): State<AppState>,
    Extension(Owner(owner)): Extension<Owner>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.writes.delete(&id, &owner).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn latest_reading(
    State(state): State<AppState>,
    Extension(Owner(owner)): Extension<Owner>,
) -> Result<Json<LatestView>, AppError> {
    let reading = state.queries.latest(&owner).await?;
    Ok(Json(LatestView {
        formatted_timestamp: format_local(reading.timestamp_ms),
        reading: ReadingView::from(&reading),
    }))
}

async fn average(
    state: State<AppState>,
    owner: Extension<Owner>,
    params: Query<FilteredQuery>,
) -> Result<Json<Value>, AppError> {
    summary(Statistic::Average, state, owner, params).await
}

async fn min(
    state: State<AppState>,
    owner: Extension<Owner>,
    params: Query<FilteredQuery>,
) -> Result<Json<Value>, AppError> {
    summary(Statistic::Min, state, owner, params).await
}

async fn max(
    state: State<AppState>,
    owner: Extension<Owner>,
    params: Query<FilteredQuery>,
) -> Result<Json<Value>, AppError> {
    summary(Statistic::Max, state, owner, params).await
}

async fn median(
    state: State<AppState>,
    owner: Extension<Owner>,
    params: Query<FilteredQuery>,
) -> Result<Json<Value>, AppError> {
    summary(Statistic::Median, state, owner, params).await
}

async fn summary(
    statistic: Statistic,
    State(state): State<AppState>,
    Extension(Owner(owner)): Extension<Owner>,
    Query(params): Query<FilteredQuery>,
) -> Result<Json<Value>, AppError> {
    let summary = state
        .queries
        .statistic(statistic, &params.filter(), &owner)
        .await?;
    Ok(Json(summary.to_json()))
}

async fn list_devices(
    State(state): State<AppState>,
    Extension(Owner(owner)): Extension<Owner>,
) -> Result<Json<Vec<DeviceView>>, AppError> {
    let devices = state.devices.find_by_owner(&owner).await?;
    Ok(Json(devices.iter().map(DeviceView::from).collect()))
}

async fn get_device(
    State(state): State<AppState>,
    Extension(Owner(owner)): Extension<Owner>,
    Path(id): Path<String>,
) -> Result<Json<DeviceView>, AppError> {
    match state.devices.find_by_id(&id).await? {
        Some(device) if device.owner_key == owner => Ok(Json(DeviceView::from(&device))),
        _ => Err(Error::device_not_found(&id).into()),
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}

fn collection(readings: &[Reading], links: Value) -> Value {
    let views: Vec<ReadingView> = readings.iter().map(ReadingView::from).collect();
    json!({ "temperatures": views, "_links": links })
}

/// `self` always; `next`/`prev` only when the pager says so.
fn page_links(
    path: &str,
    params: &[(&str, String)],
    page: usize,
    size: usize,
    pager: Option<Pager>,
) -> Value {
    let link = |page: usize| {
        let mut query: Vec<String> = params
            .iter()
            .map(|(name, value)| format!("{}={}", name, urlencoding::encode(value)))
            .collect();
        query.push(format!("page={}", page));
        query.push(format!("size={}", size));
        json!({ "href": format!("{}?{}", path, query.join("&")) })
    };

    let mut links = Map::new();
    links.insert("self".to_string(), link(page));
    if let Some(pager) = pager {
        if pager.has_next {
            links.insert("next".to_string(), link(page.saturating_add(1)));
        }
        if pager.has_previous {
            links.insert("prev".to_string(), link(page.saturating_sub(1)));
        }
    }
    Value::Object(links)
}

/// `yyyy-MM-dd HH:mm:ss` in server local time.
fn format_local(timestamp_ms: i64) -> String {
    Local
        .timestamp_millis_opt(timestamp_ms)
        .earliest()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Internal(anyhow::Error),
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound(message) => AppError::NotFound(message),
            Error::Validation(message) => AppError::BadRequest(message),
            Error::Unauthorized(message) => AppError::Unauthorized(message),
            other => AppError::Internal(other.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            AppError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            AppError::Internal(e) => {
                error!("API error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        let body = json!({ "status": status.as_u16(), "message": message });
        (status, Json(body)).into_response()
    }
}
