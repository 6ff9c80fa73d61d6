//! Private messages and received AS data, removable by their owning node.
//!
//! Unknown requests and nodes read as empty lists.

use crate::models::{AsDataRecord, PrivateMessage};
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use service_core::error::AppError;

#[derive(Debug, Deserialize)]
pub struct NodeQuery {
    pub node_id: String,
}

impl NodeQuery {
    fn node_id(&self) -> Result<&str, AppError> {
        if self.node_id.is_empty() {
            return Err(AppError::bad_request(
                service_core::error::VALIDATION_ERROR_CODE,
                "node_id cannot be empty",
            ));
        }
        Ok(&self.node_id)
    }
}

pub async fn get_private_messages(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Query(query): Query<NodeQuery>,
) -> Result<Json<Vec<PrivateMessage>>, AppError> {
    let node_id = query.node_id()?;
    Ok(Json(state.engine.store().private_messages(node_id, &request_id)))
}

pub async fn remove_private_messages(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Query(query): Query<NodeQuery>,
) -> Result<StatusCode, AppError> {
    let node_id = query.node_id()?;
    state
        .engine
        .store()
        .remove_private_messages(node_id, &request_id);
    tracing::debug!(node_id = %node_id, request_id = %request_id, "Private messages removed");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_all_private_messages(
    State(state): State<AppState>,
    Query(query): Query<NodeQuery>,
) -> Result<StatusCode, AppError> {
    let node_id = query.node_id()?;
    state.engine.store().remove_all_private_messages(node_id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_data(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Query(query): Query<NodeQuery>,
) -> Result<Json<Vec<AsDataRecord>>, AppError> {
    let node_id = query.node_id()?;
    Ok(Json(state.engine.store().as_data(node_id, &request_id)))
}

pub async fn remove_data(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Query(query): Query<NodeQuery>,
) -> Result<StatusCode, AppError> {
    let node_id = query.node_id()?;
    state.engine.store().remove_as_data(node_id, &request_id);
    tracing::debug!(node_id = %node_id, request_id = %request_id, "AS data removed");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_all_data(
    State(state): State<AppState>,
    Query(query): Query<NodeQuery>,
) -> Result<StatusCode, AppError> {
    let node_id = query.node_id()?;
    state.engine.store().remove_all_as_data(node_id);
    Ok(StatusCode::NO_CONTENT)
}
