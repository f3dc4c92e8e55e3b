use tracing::warn;

use crate::{
    dao::models::{RoomBundle, RoomCode},
    dto::{
        room::RoomView,
        sse::{Handshake, ServerEvent},
    },
};

const EVENT_HANDSHAKE: &str = "handshake";
const EVENT_ROOM_CHANGED: &str = "room_changed";

/// Initial event confirming the subscription to a room stream.
pub fn handshake_event(code: &RoomCode, degraded: bool) -> Option<ServerEvent> {
    let payload = Handshake {
        room: code.to_string(),
        message: "room stream connected".into(),
        degraded,
    };
    match ServerEvent::json(EVENT_HANDSHAKE.to_string(), &payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(room = %code, error = %err, "failed to serialize handshake event");
            None
        }
    }
}

/// Full room view pushed on every store change notification.
pub fn room_changed_event(bundle: &RoomBundle) -> Option<ServerEvent> {
    let view = RoomView::from_bundle(bundle, None);
    match ServerEvent::json(EVENT_ROOM_CHANGED.to_string(), &view) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(room = %bundle.room.code, error = %err, "failed to serialize room change event");
            None
        }
    }
}
