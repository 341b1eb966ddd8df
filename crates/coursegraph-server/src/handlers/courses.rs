//! Course management handlers (create, list, delete).

use axum::extract::{Path, State};
use axum::Json;

use coursegraph_storage::CourseId;

use crate::error::ApiError;
use crate::schema::courses::{CourseListResponse, CreateCourseRequest, CreateCourseResponse};
use crate::state::AppState;

/// Lists all courses.
///
/// `GET /courses`
pub async fn list_courses(
    State(state): State<AppState>,
) -> Result<Json<CourseListResponse>, ApiError> {
    let courses = state.list_courses().await?;
    Ok(Json(CourseListResponse { courses }))
}

/// Creates a new empty course.
///
/// `POST /courses`
pub async fn create_course(
    State(state): State<AppState>,
    Json(req): Json<CreateCourseRequest>,
) -> Result<Json<CreateCourseResponse>, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("course name must not be empty".to_string()));
    }
    let id = state.create_course(&req.name).await?;
    Ok(Json(CreateCourseResponse { id, name: req.name }))
}

/// Deletes a course and unloads its orchestrator.
///
/// `DELETE /courses/{id}`
pub async fn delete_course(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.delete_course(CourseId(id)).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}
