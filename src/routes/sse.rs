use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::Sse,
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{
    dao::models::RoomCode, error::AppError, services::sse_service, state::SharedState,
};

/// Stream a room's change notifications to a connected frontend.
#[utoipa::path(
    get,
    path = "/rooms/{code}/events",
    tag = "sse",
    params(("code" = String, Path, description = "Room code")),
    responses((status = 200, description = "Room SSE stream", content_type = "text/event-stream", body = String))
)]
pub async fn room_events(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>>, AppError> {
    let code = RoomCode::parse(&code).map_err(|err| AppError::BadRequest(err.to_string()))?;
    info!(room = %code, "new room SSE connection");
    Ok(sse_service::room_stream(&state, code).await?)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/rooms/{code}/events", get(room_events))
}
