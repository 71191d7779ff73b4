use axum::{
    extract::{rejection::PathRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::config::Config;
use crate::report::{Report, ReportGroup};
use crate::usage::{UsageSnapshot, UsageTracker};

use super::dto::*;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub tracker: UsageTracker,
}

impl AppState {
    pub fn new(config: Config, tracker: UsageTracker) -> Self {
        Self {
            config,
            tracker,
        }
    }

    /// Latest published snapshot, running a first pass if there is none yet.
    pub async fn snapshot(&self) -> Arc<UsageSnapshot> {
        match self.tracker.latest() {
            Some(snapshot) => snapshot,
            None => self.tracker.refresh().await,
        }
    }
}

/// Health check
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Latest usage snapshot
pub async fn get_usage(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.snapshot().await;
    Json(ApiResponse::success(snapshot.as_ref())).into_response()
}

/// Run a pass now and return its result
pub async fn refresh_usage(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.tracker.refresh().await;
    Json(ApiResponse::success(snapshot.as_ref())).into_response()
}

/// Cost report for one key space, as JSON or CSV
pub async fn get_report(
    State(state): State<Arc<AppState>>,
    group: Result<Path<ReportGroup>, PathRejection>,
    Query(query): Query<ReportQuery>,
) -> Response {
    let Path(group) = match group {
        Ok(group) => group,
        Err(rejection) => {
            let body = ApiResponse::<()>::error(format!(
                "unknown report group, expected month, project or model ({})",
                rejection.body_text()
            ));
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };

    let snapshot = state.snapshot().await;
    let config = &state.config;
    let report = Report::from_snapshot(
        &snapshot,
        group,
        &config.pricing.standard,
        config.display.language,
    );

    match query.format {
        ReportFormatParam::Json => Json(ApiResponse::success(report)).into_response(),
        ReportFormatParam::Csv => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            report.to_csv(),
        )
            .into_response(),
    }
}

/// Rate cards in effect
pub async fn get_pricing(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ApiResponse::success(PricingDto::from(&state.config.pricing)))
}
