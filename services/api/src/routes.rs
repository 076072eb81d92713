use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tpa_core::adjudication::{
    adjudication_router, AdjudicationApi, AuditLogRepository, BenefitPolicyRepository,
    ClaimRepository, PreAuthorizationRepository, RecordLookup,
};

/// Adjudication endpoints plus the operational probes.
pub(crate) fn with_operational_routes<L, P, C, Q, A>(
    api: Arc<AdjudicationApi<L, P, C, Q, A>>,
) -> Router
where
    L: RecordLookup + 'static,
    P: BenefitPolicyRepository + 'static,
    C: ClaimRepository + 'static,
    Q: PreAuthorizationRepository + 'static,
    A: AuditLogRepository + 'static,
{
    adjudication_router(api)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    if state.readiness.load(Ordering::Relaxed) {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "initializing" })),
        )
    }
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
