use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tokio_stream::wrappers::WatchStream;
use tracing::info;

use crate::{
    dao::models::RoomCode,
    dto::sse::ServerEvent,
    error::ServiceError,
    services::sse_events,
    state::SharedState,
};

/// Subscribe to one room's change notifications and bridge them into an
/// SSE response: a handshake event first, then the full room view on every
/// store mutation. The store subscription is dropped when the client
/// disconnects and axum drops the stream.
pub async fn room_stream(
    state: &SharedState,
    code: RoomCode,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + use<>>, ServiceError> {
    let store = state.require_room_store().await?;
    let receiver = store.watch_room(code.clone()).await?;
    let degraded = state.is_degraded().await;

    // WatchStream yields the current bundle immediately, so a late joiner
    // sees the full document before the first mutation.
    let mut changes = WatchStream::new(receiver);
    let handshake = sse_events::handshake_event(&code, degraded);

    let stream = async_stream::stream! {
        if let Some(event) = handshake {
            yield Ok(to_sse_event(event));
        }

        while let Some(bundle) = changes.next().await {
            if let Some(event) = sse_events::room_changed_event(&bundle) {
                yield Ok(to_sse_event(event));
            }
        }

        info!(room = %code, "room event stream disconnected");
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

fn to_sse_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}
