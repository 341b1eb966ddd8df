//! Node state event stream.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};

use coursegraph_storage::CourseId;

use crate::error::ApiError;
use crate::notify::{next_event, Deduplicator};
use crate::state::AppState;

/// Recent `(node, version, state)` keys each stream remembers.
const DEDUP_WINDOW: usize = 1024;

/// `GET /courses/{id}/events`
///
/// Server-sent `node_state` events, one JSON `NodeStateEvent` each, with
/// repeated deliveries filtered out. A subscriber that lags skips ahead and
/// should re-poll node state.
pub async fn stream_events(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let course = state.course(CourseId(course_id)).await?;
    let receiver = course.subscribe();
    tracing::debug!(course = course_id, "event stream opened");

    let events = stream::unfold(
        (receiver, Deduplicator::new(DEDUP_WINDOW)),
        |(mut receiver, mut dedup)| async move {
            loop {
                let event = next_event(&mut receiver).await?;
                if !dedup.first_delivery(&event) {
                    continue;
                }
                match Event::default().event("node_state").json_data(&event) {
                    Ok(sse) => return Some((Ok::<_, Infallible>(sse), (receiver, dedup))),
                    Err(err) => {
                        tracing::warn!(node = %event.node_id, error = %err, "event not encodable")
                    }
                }
            }
        },
    );

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}
