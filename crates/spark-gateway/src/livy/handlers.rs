//! Handlers for the numeric-id surface under `/api/livy/batches`.
//!
//! Integer path and query parameters are parsed by hand so rejections render
//! in this surface's `{"msg": ...}` error body, and negatives are refused
//! before they ever reach the service.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    http::{auth::AuthedUser, error::LivyApiError},
    livy::{Batch, BatchRequest, LivyState, NAMESPACE_HEADER},
};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    from: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogParams {
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateParams {
    #[serde(rename = "doAs")]
    do_as: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchState {
    pub id: i64,
    pub state: String,
}

#[derive(Debug, Serialize)]
pub struct BatchLog {
    pub id: i64,
    pub from: i64,
    pub size: i64,
    pub log: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchSessions {
    pub from: i64,
    pub total: i64,
    pub sessions: Vec<Batch>,
}

/// Parses a non-negative integer parameter, rejecting anything else with a
/// bad request in this surface's body shape.
fn non_negative(name: &str, raw: &str) -> Result<i64, LivyApiError> {
    raw.parse::<i64>()
        .ok()
        .filter(|value| *value >= 0)
        .ok_or_else(|| {
            LivyApiError::bad_request(format!(
                "parameter {name:?} must be a non-negative integer, got {raw:?}"
            ))
        })
}

fn optional_non_negative(name: &str, raw: Option<&String>) -> Result<Option<i64>, LivyApiError> {
    raw.map(|raw| non_negative(name, raw)).transpose()
}

pub async fn list_batches(
    State(state): State<LivyState>,
    Query(params): Query<ListParams>,
) -> Result<Json<BatchSessions>, LivyApiError> {
    let from = optional_non_negative("from", params.from.as_ref())?;
    let size = optional_non_negative("size", params.size.as_ref())?;

    let (from, sessions) = state.service.list(from, size).await?;

    Ok(Json(BatchSessions {
        from,
        total: i64::try_from(sessions.len()).unwrap_or(i64::MAX),
        sessions,
    }))
}

pub async fn create_batch(
    State(state): State<LivyState>,
    Query(params): Query<CreateParams>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    headers: HeaderMap,
    Json(request): Json<BatchRequest>,
) -> Result<(StatusCode, Json<Batch>), LivyApiError> {
    let namespace = headers
        .get(NAMESPACE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let batch = state
        .service
        .create(request, namespace, params.do_as, &user)
        .await?;

    Ok((StatusCode::CREATED, Json(batch)))
}

pub async fn get_batch(
    State(state): State<LivyState>,
    Path(batch_id): Path<String>,
) -> Result<Json<Batch>, LivyApiError> {
    let batch_id = non_negative("batchId", &batch_id)?;
    let batch = state.service.get(batch_id).await?;

    Ok(Json(batch))
}

pub async fn get_state(
    State(state): State<LivyState>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchState>, LivyApiError> {
    let batch_id = non_negative("batchId", &batch_id)?;
    let batch_state = state.service.state(batch_id).await?;

    Ok(Json(BatchState {
        id: batch_id,
        state: batch_state,
    }))
}

pub async fn get_log(
    State(state): State<LivyState>,
    Path(batch_id): Path<String>,
    Query(params): Query<LogParams>,
) -> Result<Json<BatchLog>, LivyApiError> {
    let batch_id = non_negative("batchId", &batch_id)?;
    let size = optional_non_negative("size", params.size.as_ref())?;

    let log = state.service.log(batch_id, size).await?;

    Ok(Json(BatchLog {
        id: batch_id,
        from: -1,
        size: i64::try_from(log.len()).unwrap_or(i64::MAX),
        log,
    }))
}

pub async fn delete_batch(
    State(state): State<LivyState>,
    Path(batch_id): Path<String>,
) -> Result<Json<Value>, LivyApiError> {
    let batch_id = non_negative("batchId", &batch_id)?;
    state.service.delete(batch_id).await?;

    Ok(Json(json!({ "msg": "deleted" })))
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;
    use crate::error::ErrorKind;

    #[rstest]
    #[case("0", Some(0))]
    #[case("42", Some(42))]
    #[case("-1", None)]
    #[case("4.2", None)]
    #[case("abc", None)]
    #[case("", None)]
    fn integer_parameters_must_be_non_negative(#[case] raw: &str, #[case] expected: Option<i64>) {
        match expected {
            Some(value) => assert_eq!(non_negative("batchId", raw).expect("parses"), value),
            None => {
                let error = non_negative("batchId", raw).unwrap_err();
                assert_eq!(error.kind(), ErrorKind::BadRequest);
            }
        }
    }
}
