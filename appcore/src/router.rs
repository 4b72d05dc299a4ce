use std::future::ready;

use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowMethods, AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::health::{HealthAggregator, HealthReport};
use crate::metrics::track_metrics;
use crate::module::ServiceModule;
use crate::ServiceInfo;

#[derive(Debug, Default, Deserialize)]
struct PingParams {
    exhaustive: Option<String>,
}

impl PingParams {
    /// Accepts `true`/`1` in any case; anything else means a fail-fast probe.
    fn exhaustive(&self) -> bool {
        self.exhaustive
            .as_deref()
            .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
    }
}

async fn ping(
    State(health): State<HealthAggregator>,
    Query(params): Query<PingParams>,
) -> HealthReport {
    match params.exhaustive() {
        true => health.probe_all().await,
        false => health.probe().await,
    }
}

fn not_found_body(info: &ServiceInfo) -> serde_json::Value {
    json!({
        "service": format!("{} service {}", info.name, info.version),
        "code": "PAGE_NOT_FOUND",
        "message": "Page not found",
    })
}

fn cors() -> CorsLayer {
    // Browsers reject a literal `*` together with credentials, so the
    // request's own origin is echoed back instead.
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true)
}

/// Builds the primary API router: the health route, the module's routes, an
/// optional `/metrics` route and a JSON 404 for everything else.
pub fn router(
    info: &ServiceInfo,
    health: HealthAggregator,
    module: &dyn ServiceModule,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let router = Router::new()
        .route("/api/ping", get(ping))
        .with_state(health);

    let mut router = module.register_routes(router);

    if let Some(recorder_handle) = metrics {
        router = router.route(
            "/metrics",
            get(move || ready(recorder_handle.render())),
        );
    }

    let not_found = not_found_body(info);
    router
        .fallback(move || ready((StatusCode::NOT_FOUND, Json(not_found.clone())).into_response()))
        .layer(axum::middleware::from_fn(track_metrics))
        .layer(CatchPanicLayer::new())
        .layer(cors())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
