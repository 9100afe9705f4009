//! Server-sent event streams.
//!
//! Run streams (`run`, `continue`, `diversify`, `finalize`) close after the
//! event that halts the run. `events` replays a session's history after a
//! cursor and then stays open. Every SSE `id` is the event's per-session
//! sequence number, so `Last-Event-ID` resumes without duplicates.

use std::collections::HashSet;
use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use events::EventEnvelope;
use futures::stream::{Stream, StreamExt};
use orchestrator::EventStream;
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub const SSE_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct EventsQuery {
    /// Deliver events with a sequence number above this
    pub after: Option<u64>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct GlobalEventsQuery {
    /// Comma-separated session IDs to filter on
    pub session_ids: Option<String>,
}

fn parse_session_ids(session_ids: Option<&str>) -> Option<HashSet<Uuid>> {
    session_ids.map(|s| {
        s.split(',')
            .filter_map(|id| id.trim().parse().ok())
            .collect()
    })
}

fn last_event_id(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("Last-Event-ID")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

fn envelope_to_sse_event(envelope: &EventEnvelope) -> Result<Event, Infallible> {
    let data = serde_json::to_string(envelope).unwrap_or_else(|_| "{}".to_string());

    Ok(Event::default()
        .id(envelope.seq.to_string())
        .event(envelope.event.kind())
        .data(data))
}

fn into_sse(stream: EventStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(stream.map(|envelope| envelope_to_sse_event(&envelope))).keep_alive(
        KeepAlive::new()
            .interval(SSE_KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}/run",
    params(("id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 200, description = "SSE stream of the run until it halts"),
        (status = 400, description = "Session is awaiting input or finished"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "A run is already in flight")
    ),
    tag = "events"
)]
pub async fn run_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    Ok(into_sse(state.engine.run(id).await?))
}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}/continue",
    params(("id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 200, description = "SSE stream from the last checkpoint until the next halt"),
        (status = 400, description = "Input for the pending checkpoint is missing"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "A run is already in flight")
    ),
    tag = "events"
)]
pub async fn continue_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    Ok(into_sse(state.engine.continue_run(id).await?))
}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}/diversify",
    params(("id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 200, description = "SSE stream of the diversify pass"),
        (status = 400, description = "Diversify not allowed here"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "A run is already in flight")
    ),
    tag = "events"
)]
pub async fn diversify_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    Ok(into_sse(state.engine.trigger_diversify(id).await?))
}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}/finalize",
    params(("id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 200, description = "SSE stream of axiom analysis and the final answer"),
        (status = 400, description = "Vote not submitted"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "A run is already in flight")
    ),
    tag = "events"
)]
pub async fn finalize_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    Ok(into_sse(state.engine.finalize(id).await?))
}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}/events",
    params(("id" = Uuid, Path, description = "Session ID"), EventsQuery),
    responses(
        (status = 200, description = "Missed events followed by live ones"),
        (status = 404, description = "Session not found")
    ),
    tag = "events"
)]
pub async fn session_events_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let after = last_event_id(&headers).or(query.after).unwrap_or(0);
    Ok(into_sse(state.engine.events_after(id, after).await?))
}

#[utoipa::path(
    get,
    path = "/api/events",
    params(GlobalEventsQuery),
    responses(
        (status = 200, description = "Live events of every session"),
    ),
    tag = "events"
)]
pub async fn events_stream(
    State(state): State<AppState>,
    Query(query): Query<GlobalEventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state
        .event_bus
        .subscribe(parse_session_ids(query.session_ids.as_deref()));

    let live_stream = futures::stream::unfold(subscription, |mut subscription| async move {
        let envelope = subscription.recv().await?;
        Some((envelope_to_sse_event(&envelope), subscription))
    });

    Sse::new(live_stream).keep_alive(
        KeepAlive::new()
            .interval(SSE_KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use council_core::Stage;

    #[test]
    fn test_parse_session_ids_filters_invalid() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let input = format!("{} , invalid,{}", a, b);
        assert_eq!(
            parse_session_ids(Some(&input)).unwrap(),
            HashSet::from([a, b])
        );
        assert!(parse_session_ids(None).is_none());
        assert!(parse_session_ids(Some("")).unwrap().is_empty());
    }

    #[test]
    fn test_last_event_id_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(last_event_id(&headers), None);

        headers.insert("Last-Event-ID", HeaderValue::from_static("42"));
        assert_eq!(last_event_id(&headers), Some(42));

        headers.insert("Last-Event-ID", HeaderValue::from_static("not-a-number"));
        assert_eq!(last_event_id(&headers), None);
    }

    #[test]
    fn test_envelope_to_sse_event_does_not_panic() {
        let mut envelope =
            EventEnvelope::new(Uuid::new_v4(), Stage::Draft, 1, events::Event::StageStart);
        envelope.seq = 7;
        let _event = envelope_to_sse_event(&envelope).unwrap();
    }
}
