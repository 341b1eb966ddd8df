//! Router assembly for the coursegraph HTTP API.
//!
//! [`build_router`] wires all handler functions to their routes with
//! CORS and tracing middleware layers.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Builds the complete axum router with all API routes.
///
/// Routes use axum 0.8 `/{param}` path syntax.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Course management
        .route(
            "/courses",
            get(handlers::courses::list_courses).post(handlers::courses::create_course),
        )
        .route(
            "/courses/{id}",
            axum::routing::delete(handlers::courses::delete_course),
        )
        // Graph mutations
        .route("/courses/{id}/nodes", post(handlers::nodes::add_node))
        .route(
            "/courses/{id}/nodes/{node_id}",
            get(handlers::nodes::get_node)
                .put(handlers::nodes::mutate_node)
                .delete(handlers::nodes::remove_node),
        )
        .route(
            "/courses/{id}/nodes/{node_id}/override",
            post(handlers::nodes::override_state),
        )
        .route("/courses/{id}/edges", post(handlers::edges::add_edge))
        // Queries
        .route(
            "/courses/{id}/nodes/{node_id}/subgraph",
            get(handlers::queries::subgraph),
        )
        .route(
            "/courses/{id}/nodes/{node_id}/impact",
            post(handlers::queries::impact),
        )
        .route("/courses/{id}/stale", get(handlers::queries::stale_nodes))
        .route(
            "/courses/{id}/sequence",
            get(handlers::queries::learning_sequence),
        )
        // Context and regeneration
        .route(
            "/courses/{id}/nodes/{node_id}/context",
            post(handlers::regenerate::build_context),
        )
        .route(
            "/courses/{id}/nodes/{node_id}/regenerate",
            post(handlers::regenerate::regenerate),
        )
        .route("/courses/{id}/leases", get(handlers::leases::lease_status))
        // Notifications
        .route("/courses/{id}/events", get(handlers::events::stream_events))
        .route(
            "/courses/{id}/propagation/flush",
            post(handlers::propagation::flush),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
