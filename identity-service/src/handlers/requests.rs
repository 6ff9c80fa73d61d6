use crate::models::{Request, ServiceStatus};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use service_core::error::AppError;

/// A stored request with its per-service counters.
#[derive(Debug, Serialize)]
pub struct RequestDetails {
    #[serde(flatten)]
    pub request: Request,
    pub service_list: Vec<ServiceStatus>,
}

pub async fn get_request(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<RequestDetails>, AppError> {
    let request = state.engine.get_request(&request_id).await?;
    let service_list = state.engine.service_status(&request_id).await?;
    Ok(Json(RequestDetails {
        request,
        service_list,
    }))
}
