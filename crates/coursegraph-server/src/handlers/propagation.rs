//! Propagation flush handler.

use axum::extract::{Path, State};
use axum::Json;

use coursegraph_storage::CourseId;

use crate::error::ApiError;
use crate::schema::queries::FlushResponse;
use crate::state::AppState;

/// Waits for queued propagation to finish, then persists the course.
///
/// `POST /courses/{id}/propagation/flush`
pub async fn flush(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
) -> Result<Json<FlushResponse>, ApiError> {
    let course = state.course(CourseId(course_id)).await?;
    course.settle().await;
    let persisted = course.persist(&state.store).await?;
    Ok(Json(FlushResponse {
        persisted,
        pending: course.pending_propagation(),
    }))
}
