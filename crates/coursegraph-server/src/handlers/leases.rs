//! Lease status handler.

use axum::extract::{Path, State};
use axum::Json;

use coursegraph_storage::CourseId;

use crate::error::ApiError;
use crate::schema::leases::LeaseStatusResponse;
use crate::state::AppState;

/// `GET /courses/{id}/leases`
pub async fn lease_status(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
) -> Result<Json<LeaseStatusResponse>, ApiError> {
    let course = state.course(CourseId(course_id)).await?;
    Ok(Json(LeaseStatusResponse {
        leases: course.lease_status(),
    }))
}
