//! SSE stream of session lifecycle and transcript events.

use crate::AppState;
use axum::{
    extract::Extension,
    response::{sse::Event, Sse},
};
use futures_util::Stream;
use std::{convert::Infallible, sync::Arc};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Handler for `GET /api/events`.
///
/// Streams every [`SessionEvent`](trunkline_types::SessionEvent) the
/// registry emits. This is the consumer surface: business layers watch
/// lifecycle and transcripts here and never mutate session state
/// directly.
pub async fn session_events_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.engine.registry().subscribe();
    let stream = BroadcastStream::new(rx);

    let mapped_stream = stream.filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(data) => Some(Ok(Event::default().data(data))),
            Err(e) => {
                tracing::error!("failed to serialize session event: {}", e);
                None
            }
        },
        Err(broadcast_error) => {
            tracing::warn!(
                error = %broadcast_error,
                "session SSE stream lagged or closed; events were dropped for this subscriber"
            );
            None
        }
    });

    Sse::new(mapped_stream).keep_alive(axum::response::sse::KeepAlive::default())
}
