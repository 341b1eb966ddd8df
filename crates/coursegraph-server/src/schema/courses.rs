//! Course management request/response types.

use coursegraph_storage::{CourseId, CourseSummary};
use serde::{Deserialize, Serialize};

/// Request to create a new course.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCourseRequest {
    /// The name for the new course.
    pub name: String,
}

/// Response from creating a course.
#[derive(Debug, Clone, Serialize)]
pub struct CreateCourseResponse {
    /// The assigned course identifier.
    pub id: CourseId,
    pub name: String,
}

/// Response for listing all courses.
#[derive(Debug, Clone, Serialize)]
pub struct CourseListResponse {
    pub courses: Vec<CourseSummary>,
}
