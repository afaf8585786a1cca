//! Frames a sequence of stream events for each transport.
//!
//! Frames go out in emission order with no buffering beyond the transport's
//! own. The response ends when the event sequence ends.

use std::time::Duration;

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::{Stream, StreamExt};

use supervisor_core::events::StreamEvent;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// `data: {json}\n\n` per event, with keep-alive comments while idle.
pub fn sse<S>(events: S, keep_alive: Duration) -> Response
where
    S: Stream<Item = StreamEvent> + Send + 'static,
{
    let frames = events.map(|event| Event::default().json_data(&event));
    Sse::new(frames)
        .keep_alive(KeepAlive::new().interval(keep_alive).text("keep-alive"))
        .into_response()
}

/// One JSON object per line.
pub fn ndjson<S>(events: S) -> Response
where
    S: Stream<Item = StreamEvent> + Send + 'static,
{
    let lines = events.map(|event| encode_line(&event));
    Response::builder()
        .header(CONTENT_TYPE, NDJSON_CONTENT_TYPE)
        .header(CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(lines))
        .unwrap_or_else(|_| Body::empty().into_response())
}

/// A WebSocket text frame payload.
pub fn encode_frame(event: &StreamEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

fn encode_line(event: &StreamEvent) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    Ok(line)
}
