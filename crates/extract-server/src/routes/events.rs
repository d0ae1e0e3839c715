use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use crate::state::AppState;

/// GET /api/events: SSE stream emitting `update` whenever `state.yaml` changes.
///
/// The data is a JSON object with `working_state`, `last_event` and
/// `last_updated`. Lagged receivers skip the missed updates.
pub async fn sse_events(State(app): State<AppState>) -> impl axum::response::IntoResponse {
    let rx = app.event_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| {
        msg.ok()
            .map(|payload| Ok::<Event, Infallible>(Event::default().event("update").data(payload)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
