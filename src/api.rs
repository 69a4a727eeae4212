//! HTTP surface of the annotation service.
//!
//! Authentication and permission checks belong to the request layer in
//! front of this service; these handlers only speak the job lifecycle.
//!
//! ```text
//! POST /api/annotation/create/{tid}  -> 200 empty | 400 error text
//! GET  /api/annotation/check/{tid}   -> {"status": ..., "progress"?: 0-100}
//! POST /api/annotation/cancel/{tid}  -> 200 empty | 400 error text
//! POST /api/annotation/meta          -> {tid: {"active": .., "success": ..}}
//! ```

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::jobs::AnnotationManager;
use crate::metrics;

#[derive(Clone)]
pub struct AppContext {
    pub manager: Arc<AnnotationManager>,
}

pub fn router(manager: Arc<AnnotationManager>) -> Router {
    Router::new()
        .route("/api/annotation/create/{tid}", post(create))
        .route("/api/annotation/check/{tid}", get(check))
        .route("/api/annotation/cancel/{tid}", post(cancel))
        .route("/api/annotation/meta", post(meta))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppContext { manager })
}

async fn create(State(ctx): State<AppContext>, Path(tid): Path<i64>) -> Response {
    info!(task_id = tid, "annotation create request");
    match ctx.manager.enqueue(tid) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            error!(task_id = tid, error = %e, "annotation create rejected");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

async fn check(State(ctx): State<AppContext>, Path(tid): Path<i64>) -> Response {
    Json(ctx.manager.status(tid)).into_response()
}

async fn cancel(State(ctx): State<AppContext>, Path(tid): Path<i64>) -> Response {
    match ctx.manager.request_cancel(tid) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            error!(task_id = tid, error = %e, "annotation cancel rejected");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

async fn meta(State(ctx): State<AppContext>, Json(tids): Json<Vec<i64>>) -> Response {
    Json(ctx.manager.bulk_status(&tids)).into_response()
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

/// Prometheus metrics endpoint
async fn metrics_handler() -> String {
    metrics::export_metrics()
}
