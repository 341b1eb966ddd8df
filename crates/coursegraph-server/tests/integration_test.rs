//! End-to-end tests for the coursegraph HTTP API.
//!
//! Tests exercise the full stack: HTTP request -> axum router -> handler ->
//! CourseService -> graph/propagation/storage -> HTTP response.
//!
//! Each test creates a fresh AppState over an in-memory SQLite database and
//! sends requests with `tower::ServiceExt::oneshot`. Propagation runs in the
//! background, so tests call the flush endpoint before checking staleness.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use serde_json::json;
use tower::ServiceExt;

use coursegraph_server::collaborators::Collaborators;
use coursegraph_server::config::OrchestratorConfig;
use coursegraph_server::router::build_router;
use coursegraph_server::state::AppState;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

fn test_app() -> Router {
    let state = AppState::in_memory().expect("failed to create in-memory AppState");
    build_router(state)
}

async fn request_json(
    app: &Router,
    method: Method,
    path: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder().method(method).uri(path);
    let request = match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&v).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(json!(null));
    (status, json)
}

async fn post_json(
    app: &Router,
    path: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    request_json(app, Method::POST, path, Some(body)).await
}

async fn put_json(
    app: &Router,
    path: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    request_json(app, Method::PUT, path, Some(body)).await
}

async fn get_json(app: &Router, path: &str) -> (StatusCode, serde_json::Value) {
    request_json(app, Method::GET, path, None).await
}

async fn delete(app: &Router, path: &str) -> (StatusCode, serde_json::Value) {
    request_json(app, Method::DELETE, path, None).await
}

async fn create_course(app: &Router) -> i64 {
    let (status, body) = post_json(app, "/courses", json!({ "name": "algebra" })).await;
    assert_eq!(status, StatusCode::OK, "create course failed: {:?}", body);
    body["id"].as_i64().unwrap()
}

async fn add_node(app: &Router, course: i64, kind: &str, content: serde_json::Value) -> u32 {
    let (status, body) = post_json(
        app,
        &format!("/courses/{}/nodes", course),
        json!({ "kind": kind, "content": content }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "add node failed: {:?}", body);
    body["id"].as_u64().unwrap() as u32
}

async fn add_edge(
    app: &Router,
    course: i64,
    from: u32,
    to: u32,
    edge_type: &str,
) -> (StatusCode, serde_json::Value) {
    post_json(
        app,
        &format!("/courses/{}/edges", course),
        json!({ "from": from, "to": to, "edge_type": edge_type }),
    )
    .await
}

async fn node(app: &Router, course: i64, id: u32) -> serde_json::Value {
    let (status, body) = get_json(app, &format!("/courses/{}/nodes/{}", course, id)).await;
    assert_eq!(status, StatusCode::OK, "get node failed: {:?}", body);
    body
}

async fn flush(app: &Router, course: i64) {
    let path = format!("/courses/{}/propagation/flush", course);
    let (status, body) = post_json(app, &path, json!({})).await;
    assert_eq!(status, StatusCode::OK, "flush failed: {:?}", body);
    assert_eq!(body["pending"], 0);
}

/// LO with an aligned content block and an assessment item.
async fn objective_fixture(app: &Router, course: i64) -> (u32, u32, u32) {
    let lo = add_node(app, course, "learning_objective", json!("Solve linear equations")).await;
    let cb = add_node(app, course, "content_block", json!({ "body": "Worked examples" })).await;
    let ai = add_node(app, course, "assessment_item", json!({ "question": "2x + 1 = 5" })).await;
    assert_eq!(add_edge(app, course, cb, lo, "ALIGNS_TO").await.0, StatusCode::OK);
    assert_eq!(add_edge(app, course, ai, lo, "ASSESSES").await.0, StatusCode::OK);
    flush(app, course).await;
    (lo, cb, ai)
}

// ---------------------------------------------------------------------------
// Courses
// ---------------------------------------------------------------------------

#[tokio::test]
async fn course_lifecycle() {
    let app = test_app();
    let course = create_course(&app).await;

    let (status, body) = get_json(&app, "/courses").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["courses"][0]["id"], course);
    assert_eq!(body["courses"][0]["name"], "algebra");

    let (status, _) = delete(&app, &format!("/courses/{}", course)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = get_json(&app, "/courses").await;
    assert!(body["courses"].as_array().unwrap().is_empty());

    let (status, body) = get_json(&app, &format!("/courses/{}/stale", course)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn empty_course_name_is_rejected() {
    let app = test_app();
    let (status, body) = post_json(&app, "/courses", json!({ "name": "  " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

// ---------------------------------------------------------------------------
// Nodes, edges, propagation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mutation_marks_aligned_and_assessing_nodes_stale() {
    let app = test_app();
    let course = create_course(&app).await;
    let (lo, cb, ai) = objective_fixture(&app, course).await;

    let (status, body) = put_json(
        &app,
        &format!("/courses/{}/nodes/{}", course, lo),
        json!({ "expected_version": 0, "content": "Solve and check linear equations" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "mutate failed: {:?}", body);
    assert_eq!(body["node"]["version"], 1);
    assert_eq!(body["content_changed"], true);
    assert_eq!(body["propagation_enqueued"], true);

    flush(&app, course).await;
    for dependent in [cb, ai] {
        let record = node(&app, course, dependent).await;
        assert_eq!(record["state"], "stale");
        assert_eq!(record["triggering_upstream"], json!({ "node": lo, "version": 1 }));
    }
    assert_eq!(node(&app, course, lo).await["state"], "fresh");

    let (_, body) = get_json(&app, &format!("/courses/{}/stale", course)).await;
    let stale: Vec<u64> = body["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["id"].as_u64().unwrap())
        .collect();
    assert_eq!(stale, vec![cb as u64, ai as u64]);
}

#[tokio::test]
async fn state_changes_stream_as_server_sent_events() {
    let app = test_app();
    let course = create_course(&app).await;
    let (lo, cb, ai) = objective_fixture(&app, course).await;

    let request = Request::builder()
        .uri(format!("/courses/{}/events", course))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    let mut frames = response.into_body().into_data_stream();

    let (status, _) = put_json(
        &app,
        &format!("/courses/{}/nodes/{}", course, lo),
        json!({ "expected_version": 0, "content": "Solve and graph linear equations" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    flush(&app, course).await;

    let mut received = String::new();
    for dependent in [cb, ai] {
        let key = format!("\"node_id\":{}", dependent);
        while !received.contains(&key) {
            let chunk = tokio::time::timeout(Duration::from_secs(2), frames.next())
                .await
                .expect("no event within 2s")
                .unwrap()
                .unwrap();
            received.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    }
    assert!(received.contains("event: node_state"));
    assert!(received.contains("\"new_state\":\"stale\""));
}

#[tokio::test]
async fn identical_content_does_not_propagate() {
    let app = test_app();
    let course = create_course(&app).await;
    let (lo, cb, _) = objective_fixture(&app, course).await;

    let (status, body) = put_json(
        &app,
        &format!("/courses/{}/nodes/{}", course, lo),
        json!({ "expected_version": 0, "content": "Solve linear equations" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content_changed"], false);
    assert_eq!(body["propagation_enqueued"], false);

    flush(&app, course).await;
    assert_eq!(node(&app, course, cb).await["state"], "fresh");
}

#[tokio::test]
async fn assesses_into_content_block_is_illegal() {
    let app = test_app();
    let course = create_course(&app).await;
    let (_, cb, ai) = objective_fixture(&app, course).await;

    let (status, body) = add_edge(&app, course, ai, cb, "ASSESSES").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "ILLEGAL_EDGE_TYPE");

    let (_, subgraph) = get_json(&app, &format!("/courses/{}/nodes/{}/subgraph", course, ai)).await;
    assert_eq!(subgraph["edges"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn closing_a_cycle_is_rejected_and_graph_unchanged() {
    let app = test_app();
    let course = create_course(&app).await;
    let a = add_node(&app, course, "course_outcome", json!("A")).await;
    let b = add_node(&app, course, "course_outcome", json!("B")).await;

    let (status, body) = add_edge(&app, course, a, b, "PARENT_OF").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], true);

    let (status, body) = add_edge(&app, course, b, a, "PARENT_OF").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CYCLE");

    let (status, subgraph) = get_json(
        &app,
        &format!("/courses/{}/nodes/{}/subgraph?direction=both&max_depth=5", course, a),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let edges = subgraph["edges"].as_array().unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0]["from"], a);
    assert_eq!(edges[0]["to"], b);
}

#[tokio::test]
async fn stale_expected_version_is_a_conflict() {
    let app = test_app();
    let course = create_course(&app).await;
    let lo = add_node(&app, course, "learning_objective", json!("v0")).await;
    let path = format!("/courses/{}/nodes/{}", course, lo);

    let (status, _) =
        put_json(&app, &path, json!({ "expected_version": 0, "content": "v1" })).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        put_json(&app, &path, json!({ "expected_version": 0, "content": "lost" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "VERSION_CONFLICT");
    assert_eq!(body["error"]["details"]["expected"], 0);
    assert_eq!(body["error"]["details"]["actual"], 1);

    let record = node(&app, course, lo).await;
    assert_eq!(record["content"], "v1");
    assert_eq!(record["version"], 1);
}

#[tokio::test]
async fn removal_retires_edges_and_stales_dependents() {
    let app = test_app();
    let course = create_course(&app).await;
    let (lo, cb, ai) = objective_fixture(&app, course).await;

    let (status, body) = delete(&app, &format!("/courses/{}/nodes/{}", course, lo)).await;
    assert_eq!(status, StatusCode::OK, "remove failed: {:?}", body);
    assert_eq!(body["retired_edges"].as_array().unwrap().len(), 2);
    assert_eq!(body["dependents"].as_array().unwrap().len(), 2);

    flush(&app, course).await;
    let (status, _) = get_json(&app, &format!("/courses/{}/nodes/{}", course, lo)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    for dependent in [cb, ai] {
        let record = node(&app, course, dependent).await;
        assert_eq!(record["state"], "stale");
        assert_eq!(record["triggering_upstream"]["node"], lo);
    }
}

#[tokio::test]
async fn override_clears_staleness() {
    let app = test_app();
    let course = create_course(&app).await;
    let (lo, cb, _) = objective_fixture(&app, course).await;
    put_json(
        &app,
        &format!("/courses/{}/nodes/{}", course, lo),
        json!({ "expected_version": 0, "content": "changed" }),
    )
    .await;
    flush(&app, course).await;

    let version = node(&app, course, cb).await["version"].as_u64().unwrap();
    let (status, body) = post_json(
        &app,
        &format!("/courses/{}/nodes/{}/override", course, cb),
        json!({ "expected_version": version }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "override failed: {:?}", body);
    assert_eq!(body["changed"], true);
    assert_eq!(body["node"]["state"], "fresh");
    assert_eq!(body["node"]["version"], version);

    let (status, _) = post_json(
        &app,
        &format!("/courses/{}/nodes/{}/override", course, cb),
        json!({ "expected_version": version + 7 }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn impact_preview_changes_nothing() {
    let app = test_app();
    let course = create_course(&app).await;
    let (lo, cb, ai) = objective_fixture(&app, course).await;

    let (status, report) = post_json(
        &app,
        &format!("/courses/{}/nodes/{}/impact", course, lo),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "impact failed: {:?}", report);
    assert_eq!(report["change"], "content_edit");
    assert_eq!(report["transitive_count"], 2);
    assert_eq!(report["direct_aligned"][0]["id"], cb);
    assert_eq!(report["direct_assessed"][0]["id"], ai);

    let (_, report) = post_json(
        &app,
        &format!("/courses/{}/nodes/{}/impact", course, lo),
        json!({ "change": "removal" }),
    )
    .await;
    assert_eq!(report["retired_edges"], 2);

    flush(&app, course).await;
    assert_eq!(node(&app, course, cb).await["state"], "fresh");
    assert_eq!(node(&app, course, lo).await["version"], 0);
}

#[tokio::test]
async fn sequence_follows_prerequisites() {
    let app = test_app();
    let course = create_course(&app).await;
    let later = add_node(&app, course, "learning_objective", json!("Quadratics")).await;
    let earlier = add_node(&app, course, "learning_objective", json!("Linear")).await;
    let (status, _) = add_edge(&app, course, earlier, later, "PREREQUISITE_FOR").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get_json(&app, &format!("/courses/{}/sequence", course)).await;
    assert_eq!(status, StatusCode::OK);
    let order: Vec<u64> = body["sequence"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["id"].as_u64().unwrap())
        .collect();
    assert_eq!(order, vec![earlier as u64, later as u64]);
}

#[tokio::test]
async fn context_is_cached_until_inputs_change() {
    let app = test_app();
    let course = create_course(&app).await;
    let (lo, cb, _) = objective_fixture(&app, course).await;
    let path = format!("/courses/{}/nodes/{}/context", course, cb);

    let (status, first) = post_json(&app, &path, json!({ "tier": "structural" })).await;
    assert_eq!(status, StatusCode::OK, "context failed: {:?}", first);
    assert_eq!(first["cache_hit"], false);
    assert_eq!(first["context"]["items"][0]["node"]["id"], cb);
    assert_eq!(first["context"]["items"][0]["role"], "target");
    assert!(first["context"]["items"]
        .as_array()
        .unwrap()
        .iter()
        .any(|item| item["node"]["id"] == lo));

    let (_, second) = post_json(&app, &path, json!({ "tier": "structural" })).await;
    assert_eq!(second["cache_hit"], true);
    assert_eq!(second["context"]["cache_key"], first["context"]["cache_key"]);

    put_json(
        &app,
        &format!("/courses/{}/nodes/{}", course, lo),
        json!({ "expected_version": 0, "content": "changed" }),
    )
    .await;
    let (_, third) = post_json(&app, &path, json!({ "tier": "structural" })).await;
    assert_eq!(third["cache_hit"], false);
    assert_ne!(third["context"]["cache_key"], first["context"]["cache_key"]);
}

#[tokio::test]
async fn unknown_nodes_and_courses_are_not_found() {
    let app = test_app();
    let course = create_course(&app).await;

    let (status, body) = get_json(&app, &format!("/courses/{}/nodes/99", course)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = get_json(&app, "/courses/999/leases").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn regeneration_without_generator_is_a_bad_request() {
    let app = test_app();
    let course = create_course(&app).await;
    let (_, cb, _) = objective_fixture(&app, course).await;

    let (status, body) = post_json(
        &app,
        &format!("/courses/{}/nodes/{}/regenerate", course, cb),
        json!({ "tier": "local" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert_eq!(node(&app, course, cb).await["state"], "fresh");
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn course_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("courses.db");
    let db_path = db_path.to_str().unwrap();

    let (course, lo, cb) = {
        let state =
            AppState::new(db_path, OrchestratorConfig::default(), Collaborators::none()).unwrap();
        let app = build_router(state);
        let course = create_course(&app).await;
        let (lo, cb, _) = objective_fixture(&app, course).await;
        put_json(
            &app,
            &format!("/courses/{}/nodes/{}", course, lo),
            json!({ "expected_version": 0, "content": "persisted" }),
        )
        .await;
        flush(&app, course).await;
        (course, lo, cb)
    };

    let state =
        AppState::new(db_path, OrchestratorConfig::default(), Collaborators::none()).unwrap();
    let app = build_router(state);
    let record = node(&app, course, lo).await;
    assert_eq!(record["content"], "persisted");
    assert_eq!(record["version"], 1);
    let dependent = node(&app, course, cb).await;
    assert_eq!(dependent["state"], "stale");
    assert_eq!(dependent["triggering_upstream"]["version"], 1);
}
