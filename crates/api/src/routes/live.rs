//! Live change stream.

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures::{Stream, StreamExt};
use homeboard_domain::LiveMessage;

use crate::AppState;

/// Server-sent events for one display.
///
/// The first frame is `connected`, followed by `heartbeat` and `change`
/// frames. Closing the connection drops the subscription and unregisters
/// the client.
pub async fn live_stream(
    State(ctx): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let subscription = ctx.broadcaster.connect();
    tracing::debug!(client_id = %subscription.client_id(), "live stream opened");

    Sse::new(subscription.map(|message| to_event(&message)))
}

fn to_event(message: &LiveMessage) -> Result<Event, axum::Error> {
    Event::default().event(message.event_name()).json_data(message)
}
