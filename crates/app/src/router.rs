use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use repo_activity_core::pipeline::IngestionPipeline;
use repo_activity_core::signature::SignatureVerifier;
use repo_activity_core::store::ActivityStore;
use repo_activity_core::timestamp::TimestampNormalizer;

use crate::{data_api, telemetry, webhook};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    store: Arc<dyn ActivityStore>,
    pipeline: Arc<IngestionPipeline>,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        store: Arc<dyn ActivityStore>,
        webhook_secret: Arc<[u8]>,
    ) -> Self {
        Self::with_normalizer(metrics, store, webhook_secret, TimestampNormalizer::system())
    }

    /// Builds the state around a specific normalizer, e.g. one with a pinned clock.
    pub fn with_normalizer(
        metrics: PrometheusHandle,
        store: Arc<dyn ActivityStore>,
        webhook_secret: Arc<[u8]>,
        normalizer: TimestampNormalizer,
    ) -> Self {
        let pipeline = IngestionPipeline::new(
            SignatureVerifier::new(webhook_secret),
            normalizer,
            store.clone(),
        );
        Self {
            metrics,
            store,
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn ActivityStore> {
        &self.store
    }

    pub fn pipeline(&self) -> &IngestionPipeline {
        &self.pipeline
    }
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("x-github-event"),
            HeaderName::from_static("x-hub-signature-256"),
        ])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/webhook/receiver", post(webhook::handle))
        .route("/data-api", get(data_api::latest))
        .route("/data-api/", get(data_api::latest))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        Body::from(body),
    )
        .into_response()
}
