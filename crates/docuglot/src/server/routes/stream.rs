//! Progress streaming endpoint with a polling fallback

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::jobs::stream::subscribe;
use crate::server::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    pub job_id: Uuid,
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false)
}

/// GET /jobs/stream?jobId= - SSE progress stream when the client accepts
/// `text/event-stream`, otherwise the same snapshot as the status endpoint
pub async fn job_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    if !wants_event_stream(&headers) {
        let snapshot = state
            .job_lookup()
            .snapshot(query.job_id)
            .ok_or(Error::JobNotFound(query.job_id))?;
        return Ok(Json(snapshot).into_response());
    }

    let tick = Duration::from_millis(state.config().processing.progress_interval_ms);
    let events = subscribe(state.job_lookup(), query.job_id, tick)?
        .map(|event| Event::default().event(event.name()).json_data(event.payload()));

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}
