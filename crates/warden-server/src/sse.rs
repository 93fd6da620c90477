//! Run events as server-sent events.

use std::convert::Infallible;

use axum::response::sse::Event;
use futures::{Stream, StreamExt};
use tracing::warn;
use warden_core::events::RunEvent;

/// One SSE event per run event: `event:` is the frame type, `data:` the
/// frame JSON.
pub fn to_sse_event(event: &RunEvent) -> Event {
    let name = event.kind.type_name();
    match Event::default().event(name).json_data(event) {
        Ok(sse) => sse,
        Err(e) => {
            warn!(error = %e, event = name, run_tag = %event.run_tag, "failed to encode run event");
            Event::default().event(name).data("{}")
        }
    }
}

/// Adapt a run event stream for [`axum::response::sse::Sse`].
pub fn sse_stream<S>(events: S) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static
where
    S: Stream<Item = RunEvent> + Send + 'static,
{
    events.map(|event| Ok(to_sse_event(&event)))
}
