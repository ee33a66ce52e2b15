use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use tracing::error;

use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Returns the most recently timestamped activity record, or `204` when none exists.
pub async fn latest(State(state): State<AppState>) -> Result<Response, ProblemResponse> {
    match state.store().fetch_latest().await {
        Ok(Some(activity)) => {
            counter!("data_api_requests_total", "result" => "hit").increment(1);
            Ok(Json(activity).into_response())
        }
        Ok(None) => {
            counter!("data_api_requests_total", "result" => "empty").increment(1);
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        Err(err) => {
            counter!("data_api_requests_total", "result" => "error").increment(1);
            error!(stage = "data_api", error = %err, "failed to load latest activity");
            Err(ProblemResponse::internal(
                "storage_error",
                "failed to load latest activity",
            ))
        }
    }
}
