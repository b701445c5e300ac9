use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::csv::to_csv_string;
use crate::error::{AppError, AppResult, Error};
use crate::export::{Exporter, Metric};
use crate::filter::{Filter, Granularity, DATE_LAYOUT};

pub struct ExportState {
    pub exporter: Arc<Exporter>,
    pub default_limit: u32,
    pub request_timeout: Duration,
}

/// Query string of `GET /{metric}`. Lists are comma-separated.
#[derive(Debug, Default, Deserialize)]
pub struct ExportParams {
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<String>,
    pub granularity: Option<String>,
    pub sources: Option<String>,
    pub language_codes: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub fn router(state: Arc<ExportState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/{metric}", get(export_metric))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
    })
}

/// GET /{metric} - Aggregate one metric and return it as CSV.
pub async fn export_metric(
    State(state): State<Arc<ExportState>>,
    Path(metric): Path<String>,
    Query(params): Query<ExportParams>,
) -> AppResult<Response> {
    let metric: Metric = metric
        .parse()
        .map_err(|_| AppError::NotFound(format!("unknown metric {metric:?}")))?;
    let filter = filter_from_params(&params, Utc::now().date_naive(), state.default_limit)?;

    // cancels in-flight upstream calls if the client goes away
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let table = tokio::time::timeout(
        state.request_timeout,
        state.exporter.aggregate(&cancel, &filter, metric),
    )
    .await
    .map_err(|_| AppError::Timeout)??;

    let body = to_csv_string(&table).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(([(CONTENT_TYPE, "text/csv; charset=utf-8")], body).into_response())
}

/// Build a filter from query parameters. Missing `to` is today, missing
/// `from` is the day before `to`.
pub fn filter_from_params(
    params: &ExportParams,
    today: NaiveDate,
    default_limit: u32,
) -> AppResult<Filter> {
    let to = match non_empty(&params.to) {
        Some(raw) => parse_date("to", raw)?,
        None => today,
    };
    let from = match non_empty(&params.from) {
        Some(raw) => parse_date("from", raw)?,
        None => to
            .checked_sub_days(Days::new(1))
            .ok_or_else(|| AppError::Validation("\"to\" is out of range".to_string()))?,
    };
    let limit = match non_empty(&params.limit) {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| AppError::Validation(format!("invalid limit {raw:?}")))?,
        None => default_limit,
    };
    let granularity = match non_empty(&params.granularity) {
        Some(raw) => raw.parse::<Granularity>().map_err(|e| match e {
            Error::Validation(msg) => AppError::Validation(msg),
            other => AppError::Export(other),
        })?,
        None => Granularity::Day,
    };

    let filter = Filter {
        timezone: non_empty(&params.timezone).map(str::to_string),
        language_codes: split_list(&params.language_codes),
        ..Filter::new(from, to)
            .with_limit(limit)
            .with_granularity(granularity)
            .with_sources(split_list(&params.sources))
    };
    filter.validated_range().map_err(|e| AppError::Validation(e.to_string()))?;
    Ok(filter)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_date(name: &str, raw: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_LAYOUT)
        .map_err(|_| AppError::Validation(format!("invalid {name} date {raw:?}, expected YYYY-MM-DD")))
}

fn split_list(value: &Option<String>) -> Vec<String> {
    value
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
