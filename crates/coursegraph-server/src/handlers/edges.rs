//! Edge handlers.

use axum::extract::{Path, State};
use axum::Json;

use coursegraph_core::id::NodeId;
use coursegraph_storage::CourseId;

use crate::error::ApiError;
use crate::schema::edges::{AddEdgeRequest, AddEdgeResponse};
use crate::state::AppState;

/// Adds a typed edge. Rejected with CYCLE or ILLEGAL_EDGE_TYPE before any
/// state changes.
///
/// `POST /courses/{id}/edges`
pub async fn add_edge(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
    Json(req): Json<AddEdgeRequest>,
) -> Result<Json<AddEdgeResponse>, ApiError> {
    let course = state.course(CourseId(course_id)).await?;
    let outcome = course.add_edge(NodeId(req.from), NodeId(req.to), req.edge_type)?;
    if outcome.created {
        state.persist(&course).await;
    }
    Ok(Json(outcome.into()))
}
