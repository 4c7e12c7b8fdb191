//! Server-Sent Events support

use crate::notifier::{PushEvent, Subscription};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Convert a push subscription into an SSE stream with a periodic ping.
/// The stream ends when `shutdown` is cancelled.
pub fn sse_stream(
    subscription: Subscription,
    ping_interval: Duration,
    shutdown: CancellationToken,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = subscription
        .map(|event| Ok(push_event_to_axum(&event)))
        .take_until(shutdown.cancelled_owned());

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(ping_interval)
            .event(Event::default().event("ping").data("{}")),
    )
}

fn push_event_to_axum(event: &PushEvent) -> Event {
    Event::default().json_data(event).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to serialize push event");
        Event::default().comment("unserializable event")
    })
}
