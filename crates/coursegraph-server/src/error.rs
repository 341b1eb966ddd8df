//! API error types with HTTP status code mapping.
//!
//! [`ApiError`] is the unified error type for all API endpoints. It implements
//! `axum::response::IntoResponse` to produce structured JSON error responses
//! with appropriate HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;

use coursegraph_core::error::GraphError;
use coursegraph_storage::StorageError;

use crate::regenerate::RegenerateError;

/// Structured error detail in API responses.
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "CYCLE").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured details (e.g., the versions of a conflict).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API errors with HTTP status code mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Entity not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The edge would close a cycle (409).
    #[error("{0}")]
    Cycle(String),

    /// Endpoint kinds violate the edge type (422).
    #[error("{0}")]
    IllegalEdgeType(String),

    /// Stale expected version (409).
    #[error("{message}")]
    VersionConflict {
        message: String,
        expected: u64,
        actual: u64,
    },

    /// The node is not in a state that allows the operation (409).
    #[error("{0}")]
    InvalidState(String),

    /// A regeneration lease is held on the node (409).
    #[error("{0}")]
    AlreadyRegenerating(String),

    /// The regeneration result was discarded (409).
    #[error("{message}")]
    Superseded { message: String, reason: String },

    /// The generator did not answer in time (504).
    #[error("{message}")]
    GenerationTimeout { message: String, context_hash: String },

    /// The generator failed or returned unusable output (502).
    #[error("{message}")]
    GenerationFailed {
        message: String,
        context_hash: Option<String>,
    },

    /// Internal server error (500).
    #[error("internal error: {0}")]
    InternalError(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, Option<serde_json::Value>) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", None),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", None),
            ApiError::Cycle(_) => (StatusCode::CONFLICT, "CYCLE", None),
            ApiError::IllegalEdgeType(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "ILLEGAL_EDGE_TYPE", None)
            }
            ApiError::VersionConflict {
                expected, actual, ..
            } => (
                StatusCode::CONFLICT,
                "VERSION_CONFLICT",
                Some(json!({ "expected": expected, "actual": actual })),
            ),
            ApiError::InvalidState(_) => (StatusCode::CONFLICT, "INVALID_STATE", None),
            ApiError::AlreadyRegenerating(_) => {
                (StatusCode::CONFLICT, "ALREADY_REGENERATING", None)
            }
            ApiError::Superseded { reason, .. } => (
                StatusCode::CONFLICT,
                "SUPERSEDED",
                Some(json!({ "reason": reason })),
            ),
            ApiError::GenerationTimeout { context_hash, .. } => (
                StatusCode::GATEWAY_TIMEOUT,
                "GENERATION_TIMEOUT",
                Some(json!({ "context_hash": context_hash })),
            ),
            ApiError::GenerationFailed { context_hash, .. } => (
                StatusCode::BAD_GATEWAY,
                "GENERATION_FAILED",
                context_hash
                    .as_ref()
                    .map(|hash| json!({ "context_hash": hash })),
            ),
            ApiError::InternalError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, details) = self.parts();
        let detail = ApiErrorDetail {
            code: code.to_string(),
            message: self.to_string(),
            details,
        };

        let body = json!({
            "success": false,
            "error": detail,
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<GraphError> for ApiError {
    fn from(err: GraphError) -> Self {
        match &err {
            GraphError::NodeNotFound { .. } => ApiError::NotFound(err.to_string()),
            GraphError::Cycle { .. } => ApiError::Cycle(err.to_string()),
            GraphError::IllegalEdgeType { .. } => ApiError::IllegalEdgeType(err.to_string()),
            GraphError::VersionConflict {
                expected, actual, ..
            } => ApiError::VersionConflict {
                message: err.to_string(),
                expected: *expected,
                actual: *actual,
            },
            GraphError::InvalidState { .. } => ApiError::InvalidState(err.to_string()),
            GraphError::Conflicted { .. } => ApiError::Superseded {
                message: err.to_string(),
                reason: "upstream_changed".to_string(),
            },
            GraphError::InconsistentSnapshot { .. } => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match &err {
            StorageError::CourseNotFound(_) => ApiError::NotFound(err.to_string()),
            _ => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<RegenerateError> for ApiError {
    fn from(err: RegenerateError) -> Self {
        match err {
            RegenerateError::AlreadyRegenerating { .. } => {
                ApiError::AlreadyRegenerating(err.to_string())
            }
            RegenerateError::Superseded { reason, .. } => ApiError::Superseded {
                message: err.to_string(),
                reason: reason.to_string(),
            },
            RegenerateError::GenerationTimeout { context_hash, .. } => {
                ApiError::GenerationTimeout {
                    message: err.to_string(),
                    context_hash: context_hash.to_hex(),
                }
            }
            RegenerateError::GenerationFailed { context_hash, .. } => {
                ApiError::GenerationFailed {
                    message: err.to_string(),
                    context_hash: Some(context_hash.to_hex()),
                }
            }
            RegenerateError::Classifier(_) => ApiError::GenerationFailed {
                message: err.to_string(),
                context_hash: None,
            },
            RegenerateError::NoTier | RegenerateError::NoGenerator => {
                ApiError::BadRequest(err.to_string())
            }
            RegenerateError::Graph(graph) => graph.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursegraph_core::edge::EdgeType;
    use coursegraph_core::hash::ContentHash;
    use coursegraph_core::id::NodeId;
    use coursegraph_core::node::NodeKind;

    use crate::collaborators::CollaboratorError;
    use crate::regenerate::SupersededReason;

    async fn body_of(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn graph_errors_map_to_codes() {
        let cycle = GraphError::Cycle {
            from: NodeId(1),
            to: NodeId(0),
        };
        let (status, body) = body_of(cycle.into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "CYCLE");

        let illegal = GraphError::IllegalEdgeType {
            edge_type: EdgeType::Assesses,
            from_kind: NodeKind::AssessmentItem,
            to_kind: NodeKind::ContentBlock,
        };
        let (status, body) = body_of(illegal.into()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "ILLEGAL_EDGE_TYPE");

        let conflict = GraphError::VersionConflict {
            id: NodeId(2),
            expected: 1,
            actual: 3,
        };
        let (status, body) = body_of(conflict.into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["details"]["actual"], 3);

        let (status, _) = body_of(GraphError::NodeNotFound { id: NodeId(9) }.into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn regeneration_errors_map_to_codes() {
        let hash = ContentHash([7; 32]);

        let timeout = RegenerateError::GenerationTimeout {
            node: NodeId(1),
            context_hash: hash,
        };
        let (status, body) = body_of(timeout.into()).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"]["details"]["context_hash"], hash.to_hex());

        let failed = RegenerateError::GenerationFailed {
            node: NodeId(1),
            context_hash: hash,
            source: CollaboratorError::Request("down".into()),
        };
        let (status, body) = body_of(failed.into()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "GENERATION_FAILED");

        let superseded = RegenerateError::Superseded {
            node: NodeId(1),
            reason: SupersededReason::ConcurrentEdit,
        };
        let (status, body) = body_of(superseded.into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "SUPERSEDED");
        assert_eq!(body["error"]["details"]["reason"], "concurrent_edit");

        let held = RegenerateError::AlreadyRegenerating { node: NodeId(1) };
        let (status, body) = body_of(held.into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "ALREADY_REGENERATING");
    }

    #[tokio::test]
    async fn missing_course_is_not_found() {
        let (status, body) = body_of(StorageError::CourseNotFound(4).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }
}
