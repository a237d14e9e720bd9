use crate::infra::{AppState, ApiState, InMemoryProfileDirectory};
use axum::extract::Path;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use axum::Json;
use leasekeeper::workflows::tenancy::{
    tenancy_router, PartyId, PartyProfile, ProfileCompleteness,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_operational_routes(
    api: Arc<ApiState>,
    profiles: InMemoryProfileDirectory,
) -> axum::Router {
    tenancy_router(api)
        .route(
            "/api/v1/profiles/:party_id",
            axum::routing::put(register_profile),
        )
        .layer(Extension(profiles))
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProfileRegistration {
    pub(crate) name: String,
    pub(crate) government_id: String,
    #[serde(default)]
    pub(crate) missing_fields: Vec<String>,
}

pub(crate) async fn register_profile(
    Extension(profiles): Extension<InMemoryProfileDirectory>,
    Path(party_id): Path<String>,
    Json(body): Json<ProfileRegistration>,
) -> Response {
    let profile = PartyProfile {
        party_id: PartyId::new(party_id),
        name: body.name,
        government_id: body.government_id,
        completeness: ProfileCompleteness::missing(body.missing_fields),
    };
    match profiles.register(profile) {
        Ok(profile) => {
            let payload = json!({
                "party_id": profile.party_id,
                "complete": profile.completeness.is_complete(),
                "missing_fields": profile.completeness.missing_fields,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(error) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": error.to_string() })),
        )
            .into_response(),
    }
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
