//! Node handlers: add, read, mutate, remove, override.

use axum::extract::{Path, State};
use axum::Json;

use coursegraph_core::id::NodeId;
use coursegraph_core::node::{Content, NodeRecord};
use coursegraph_storage::CourseId;

use crate::error::ApiError;
use crate::schema::nodes::{
    AddNodeRequest, MutateNodeRequest, MutateNodeResponse, OverrideRequest, OverrideResponse,
    RemoveNodeResponse,
};
use crate::state::AppState;

/// `POST /courses/{id}/nodes`
pub async fn add_node(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
    Json(req): Json<AddNodeRequest>,
) -> Result<Json<NodeRecord>, ApiError> {
    let course = state.course(CourseId(course_id)).await?;
    let record = course.add_node(req.kind, Content::new(req.content))?;
    state.persist(&course).await;
    Ok(Json(record))
}

/// `GET /courses/{id}/nodes/{node_id}`
pub async fn get_node(
    State(state): State<AppState>,
    Path((course_id, node_id)): Path<(i64, u32)>,
) -> Result<Json<NodeRecord>, ApiError> {
    let course = state.course(CourseId(course_id)).await?;
    Ok(Json(course.get_node(NodeId(node_id))?))
}

/// Replaces a node's content under optimistic concurrency.
///
/// `PUT /courses/{id}/nodes/{node_id}`
pub async fn mutate_node(
    State(state): State<AppState>,
    Path((course_id, node_id)): Path<(i64, u32)>,
    Json(req): Json<MutateNodeRequest>,
) -> Result<Json<MutateNodeResponse>, ApiError> {
    let course = state.course(CourseId(course_id)).await?;
    let (outcome, enqueued) =
        course.mutate_node(NodeId(node_id), req.expected_version, Content::new(req.content))?;
    state.persist(&course).await;
    Ok(Json(MutateNodeResponse::new(outcome, enqueued)))
}

/// Tombstones a node and retires its edges.
///
/// `DELETE /courses/{id}/nodes/{node_id}`
pub async fn remove_node(
    State(state): State<AppState>,
    Path((course_id, node_id)): Path<(i64, u32)>,
) -> Result<Json<RemoveNodeResponse>, ApiError> {
    let course = state.course(CourseId(course_id)).await?;
    let outcome = course.remove_node(NodeId(node_id))?;
    state.persist(&course).await;
    Ok(Json(outcome.into()))
}

/// `POST /courses/{id}/nodes/{node_id}/override`
pub async fn override_state(
    State(state): State<AppState>,
    Path((course_id, node_id)): Path<(i64, u32)>,
    Json(req): Json<OverrideRequest>,
) -> Result<Json<OverrideResponse>, ApiError> {
    let course = state.course(CourseId(course_id)).await?;
    let (node, changed) = course.override_state(NodeId(node_id), req.expected_version)?;
    state.persist(&course).await;
    Ok(Json(OverrideResponse { node, changed }))
}
