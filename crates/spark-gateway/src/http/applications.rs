//! Handlers for the primary application surface under
//! `/api/v1/applications`.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::{
    application::{ApplicationStatus, SparkApplication},
    http::{ApiState, auth::AuthedUser, error::ApiError},
    service::GatewayApplication,
};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    cluster: Option<String>,
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogsParams {
    lines: Option<i64>,
}

pub async fn list_applications(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<SparkApplication>>, ApiError> {
    let cluster = params
        .cluster
        .ok_or_else(|| ApiError::bad_request("missing required query parameter 'cluster'"))?;
    let namespace = params.namespace.unwrap_or_else(|| crate::service::ALL.to_owned());

    // Dropping the handler (the client went away) cancels the fan-out.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let applications = state.service.list(&cluster, &namespace, cancel).await?;

    Ok(Json(applications))
}

pub async fn create_application(
    State(state): State<ApiState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    Json(application): Json<SparkApplication>,
) -> Result<(StatusCode, Json<GatewayApplication>), ApiError> {
    let record = state.service.create(application, &user).await?;

    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn get_application(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<GatewayApplication>, ApiError> {
    let record = state.service.get(&id).await?;

    Ok(Json(record))
}

pub async fn get_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<ApplicationStatus>, ApiError> {
    let status = state.service.status(&id).await?;

    Ok(Json(status))
}

pub async fn get_logs(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(params): Query<LogsParams>,
) -> Result<Json<String>, ApiError> {
    let lines = params.lines.unwrap_or(state.default_log_lines);
    let logs = state.service.logs(&id, lines).await?;

    Ok(Json(logs))
}

pub async fn delete_application(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.service.delete(&id).await?;

    Ok(Json(json!({ "status": "success" })))
}
