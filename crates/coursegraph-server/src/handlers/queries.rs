//! Read-only query handlers.

use axum::extract::{Path, Query, State};
use axum::Json;

use coursegraph_core::graph::Subgraph;
use coursegraph_core::id::NodeId;
use coursegraph_core::impact::ImpactReport;
use coursegraph_storage::CourseId;

use crate::error::ApiError;
use crate::schema::queries::{
    ImpactRequest, SequenceResponse, StaleNodesResponse, SubgraphQuery, DEFAULT_SUBGRAPH_DEPTH,
};
use crate::state::AppState;

/// `GET /courses/{id}/nodes/{node_id}/subgraph?direction=..&max_depth=..`
pub async fn subgraph(
    State(state): State<AppState>,
    Path((course_id, node_id)): Path<(i64, u32)>,
    Query(query): Query<SubgraphQuery>,
) -> Result<Json<Subgraph>, ApiError> {
    let course = state.course(CourseId(course_id)).await?;
    let depth = query.max_depth.unwrap_or(DEFAULT_SUBGRAPH_DEPTH);
    Ok(Json(course.subgraph(NodeId(node_id), query.direction, depth)?))
}

/// Previews which nodes a change would mark stale. Mutates nothing.
///
/// `POST /courses/{id}/nodes/{node_id}/impact`
pub async fn impact(
    State(state): State<AppState>,
    Path((course_id, node_id)): Path<(i64, u32)>,
    Json(req): Json<ImpactRequest>,
) -> Result<Json<ImpactReport>, ApiError> {
    let course = state.course(CourseId(course_id)).await?;
    Ok(Json(course.preview_impact(NodeId(node_id), req.change)?))
}

/// `GET /courses/{id}/stale`
pub async fn stale_nodes(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
) -> Result<Json<StaleNodesResponse>, ApiError> {
    let course = state.course(CourseId(course_id)).await?;
    Ok(Json(StaleNodesResponse {
        nodes: course.stale_nodes(),
    }))
}

/// `GET /courses/{id}/sequence`
pub async fn learning_sequence(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
) -> Result<Json<SequenceResponse>, ApiError> {
    let course = state.course(CourseId(course_id)).await?;
    Ok(Json(SequenceResponse {
        sequence: course.learning_sequence(),
    }))
}
