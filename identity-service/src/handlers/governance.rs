//! NDID provisioning and node self-service: namespaces, nodes, services and
//! the callback URL each node receives events on.

use crate::models::{
    AsService, Namespace, Node, RegisterAsServiceParams, RegisterNamespaceParams,
    RegisterNodeParams, Service,
};
use crate::services::ServiceError;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use service_core::error::AppError;

#[derive(Debug, Deserialize)]
pub struct RegisterServiceRequest {
    pub service_id: String,
    #[serde(default)]
    pub service_name: String,
}

#[derive(Debug, Deserialize)]
pub struct SetCallbackRequest {
    pub node_id: String,
    pub url: String,
}

pub async fn register_namespace(
    State(state): State<AppState>,
    Json(params): Json<RegisterNamespaceParams>,
) -> Result<(StatusCode, Json<Namespace>), AppError> {
    let namespace = state.engine.governance().register_namespace(params)?;
    Ok((StatusCode::CREATED, Json(namespace)))
}

pub async fn list_namespaces(State(state): State<AppState>) -> Json<Vec<Namespace>> {
    Json(state.engine.governance().list_namespaces())
}

pub async fn register_node(
    State(state): State<AppState>,
    Json(params): Json<RegisterNodeParams>,
) -> Result<(StatusCode, Json<Node>), AppError> {
    let node = state.engine.governance().register_node(params)?;
    Ok((StatusCode::CREATED, Json(node)))
}

pub async fn get_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<Node>, AppError> {
    Ok(Json(state.engine.governance().get_node(&node_id)?))
}

pub async fn register_service(
    State(state): State<AppState>,
    Json(body): Json<RegisterServiceRequest>,
) -> Result<(StatusCode, Json<Service>), AppError> {
    let service = state
        .engine
        .governance()
        .register_service(&body.service_id, &body.service_name)?;
    Ok((StatusCode::CREATED, Json(service)))
}

pub async fn register_as_service(
    State(state): State<AppState>,
    Path(as_id): Path<String>,
    Json(params): Json<RegisterAsServiceParams>,
) -> Result<Json<AsService>, AppError> {
    Ok(Json(
        state
            .engine
            .governance()
            .register_as_service(&as_id, params)?,
    ))
}

/// Queued callbacks for the node start flowing once this lands.
pub async fn set_callback_url(
    State(state): State<AppState>,
    Json(body): Json<SetCallbackRequest>,
) -> Result<StatusCode, AppError> {
    if body.url.is_empty() {
        return Err(ServiceError::InvalidParameter("url cannot be empty".to_string()).into());
    }
    state
        .engine
        .governance()
        .set_callback_url(&body.node_id, &body.url)?;
    tracing::info!(node_id = %body.node_id, url = %body.url, "Callback URL set");
    Ok(StatusCode::NO_CONTENT)
}
