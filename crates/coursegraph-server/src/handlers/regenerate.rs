//! Context assembly and regeneration handlers.

use axum::extract::{Path, State};
use axum::Json;

use coursegraph_core::id::NodeId;
use coursegraph_storage::CourseId;

use crate::error::ApiError;
use crate::regenerate::RegenerationOutcome;
use crate::schema::regenerate::{ContextRequest, ContextResponse, RegenerateRequest};
use crate::state::AppState;

/// Assembles the context a regeneration at `tier` would send.
///
/// `POST /courses/{id}/nodes/{node_id}/context`
pub async fn build_context(
    State(state): State<AppState>,
    Path((course_id, node_id)): Path<(i64, u32)>,
    Json(req): Json<ContextRequest>,
) -> Result<Json<ContextResponse>, ApiError> {
    let course = state.course(CourseId(course_id)).await?;
    let assembled = course.build_context(NodeId(node_id), req.tier).await?;
    Ok(Json(assembled.into()))
}

/// Regenerates one node. Responds once the result is committed or
/// discarded.
///
/// `POST /courses/{id}/nodes/{node_id}/regenerate`
pub async fn regenerate(
    State(state): State<AppState>,
    Path((course_id, node_id)): Path<(i64, u32)>,
    Json(req): Json<RegenerateRequest>,
) -> Result<Json<RegenerationOutcome>, ApiError> {
    let course = state.course(CourseId(course_id)).await?;
    let result = course.regenerate(NodeId(node_id), req.into()).await;
    state.persist(&course).await;
    Ok(Json(result?))
}
