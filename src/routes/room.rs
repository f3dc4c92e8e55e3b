use axum::{
    Json, Router,
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dao::models::RoomCode,
    dto::room::{
        AckRequest, CreateRoomRequest, JoinedRoom, RoomCreated, RoomView, SubmitAnswersRequest,
        SubmitVerdictsRequest,
    },
    error::AppError,
    services::{ack_service, room_service, round_service, transition_service, writers},
    state::SharedState,
};

/// Header carrying the participant token issued at create/join time.
const PARTICIPANT_TOKEN_HEADER: &str = "x-participant-token";

/// Routes handling the room lifecycle and participant writes.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms", post(create_room))
        .route("/rooms/{code}", get(room_view))
        .route("/rooms/{code}/join", post(join_room))
        .route("/rooms/{code}/unseal", post(unseal_room))
        .route("/rooms/{code}/start", post(start_match))
        .route("/rooms/{code}/answers", post(submit_answers))
        .route("/rooms/{code}/verdicts", post(submit_verdicts))
        .route("/rooms/{code}/acks/marking", post(ack_marking))
        .route("/rooms/{code}/acks/award", post(ack_award))
        .route("/rooms/{code}/maths/complete", post(complete_maths))
}

fn parse_code(code: &str) -> Result<RoomCode, AppError> {
    RoomCode::parse(code).map_err(|err| AppError::BadRequest(err.to_string()))
}

fn participant_token(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get(PARTICIPANT_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            AppError::Unauthorized(format!("missing `{PARTICIPANT_TOKEN_HEADER}` header"))
        })
}

/// Create a fresh room seeded with five rounds of content.
#[utoipa::path(
    post,
    path = "/rooms",
    tag = "room",
    request_body = CreateRoomRequest,
    responses(
        (status = 200, description = "Room created", body = RoomCreated)
    )
)]
pub async fn create_room(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateRoomRequest>>,
) -> Result<Json<RoomCreated>, AppError> {
    let created = room_service::create_room(&state, payload).await?;
    Ok(Json(created))
}

/// Join an existing room as the guest.
#[utoipa::path(
    post,
    path = "/rooms/{code}/join",
    tag = "room",
    params(("code" = String, Path, description = "Room code")),
    responses(
        (status = 200, description = "Joined", body = JoinedRoom)
    )
)]
pub async fn join_room(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<JoinedRoom>, AppError> {
    let code = parse_code(&code)?;
    let joined = room_service::join_room(&state, &code).await?;
    Ok(Json(joined))
}

/// Host confirmation that the content pack is ready (keyroom -> coderoom).
#[utoipa::path(
    post,
    path = "/rooms/{code}/unseal",
    tag = "room",
    params(("code" = String, Path, description = "Room code")),
    responses(
        (status = 200, description = "Pack confirmed", body = RoomView)
    )
)]
pub async fn unseal_room(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RoomView>, AppError> {
    let code = parse_code(&code)?;
    let token = participant_token(&headers)?;
    let host = writers::host_writer(&state, token, &code).await?;
    room_service::confirm_unsealed(&host).await?;
    Ok(Json(
        room_service::room_view(&state, &code, Some(token)).await?,
    ))
}

/// Host starts the match, arming round 1 (coderoom -> countdown).
#[utoipa::path(
    post,
    path = "/rooms/{code}/start",
    tag = "room",
    params(("code" = String, Path, description = "Room code")),
    responses(
        (status = 200, description = "Match started", body = RoomView)
    )
)]
pub async fn start_match(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RoomView>, AppError> {
    let code = parse_code(&code)?;
    let token = participant_token(&headers)?;
    let host = writers::host_writer(&state, token, &code).await?;
    room_service::start_match(&state, &host).await?;
    Ok(Json(
        room_service::room_view(&state, &code, Some(token)).await?,
    ))
}

/// Submit the authenticated participant's three answers for a round.
#[utoipa::path(
    post,
    path = "/rooms/{code}/answers",
    tag = "room",
    params(("code" = String, Path, description = "Room code")),
    request_body = SubmitAnswersRequest,
    responses(
        (status = 200, description = "Answers recorded", body = RoomView)
    )
)]
pub async fn submit_answers(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Valid(Json(payload)): Valid<Json<SubmitAnswersRequest>>,
) -> Result<Json<RoomView>, AppError> {
    let code = parse_code(&code)?;
    let token = participant_token(&headers)?;
    let writer = writers::participant_writer(&state, token, &code).await?;
    round_service::submit_answers(&writer, payload).await?;
    Ok(Json(
        room_service::room_view(&state, &code, Some(token)).await?,
    ))
}

/// Submit the authenticated participant's three verdicts for a round.
#[utoipa::path(
    post,
    path = "/rooms/{code}/verdicts",
    tag = "room",
    params(("code" = String, Path, description = "Room code")),
    request_body = SubmitVerdictsRequest,
    responses(
        (status = 200, description = "Verdicts recorded", body = RoomView)
    )
)]
pub async fn submit_verdicts(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Valid(Json(payload)): Valid<Json<SubmitVerdictsRequest>>,
) -> Result<Json<RoomView>, AppError> {
    let code = parse_code(&code)?;
    let token = participant_token(&headers)?;
    let writer = writers::participant_writer(&state, token, &code).await?;
    round_service::submit_verdicts(&writer, payload).await?;
    Ok(Json(
        room_service::room_view(&state, &code, Some(token)).await?,
    ))
}

/// Acknowledge completion of the marking phase for a round.
#[utoipa::path(
    post,
    path = "/rooms/{code}/acks/marking",
    tag = "room",
    params(("code" = String, Path, description = "Room code")),
    request_body = AckRequest,
    responses(
        (status = 200, description = "Acknowledged", body = RoomView)
    )
)]
pub async fn ack_marking(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Valid(Json(payload)): Valid<Json<AckRequest>>,
) -> Result<Json<RoomView>, AppError> {
    let code = parse_code(&code)?;
    let token = participant_token(&headers)?;
    let writer = writers::participant_writer(&state, token, &code).await?;
    ack_service::set_marking_ack(&writer, payload.round).await?;
    Ok(Json(
        room_service::room_view(&state, &code, Some(token)).await?,
    ))
}

/// Acknowledge the award screen for a round.
#[utoipa::path(
    post,
    path = "/rooms/{code}/acks/award",
    tag = "room",
    params(("code" = String, Path, description = "Room code")),
    request_body = AckRequest,
    responses(
        (status = 200, description = "Acknowledged", body = RoomView)
    )
)]
pub async fn ack_award(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Valid(Json(payload)): Valid<Json<AckRequest>>,
) -> Result<Json<RoomView>, AppError> {
    let code = parse_code(&code)?;
    let token = participant_token(&headers)?;
    let writer = writers::participant_writer(&state, token, &code).await?;
    ack_service::set_award_ack(&writer, payload.round).await?;
    Ok(Json(
        room_service::room_view(&state, &code, Some(token)).await?,
    ))
}

/// Host marks the maths mini-game finished (maths -> final).
#[utoipa::path(
    post,
    path = "/rooms/{code}/maths/complete",
    tag = "room",
    params(("code" = String, Path, description = "Room code")),
    responses(
        (status = 200, description = "Match finished", body = RoomView)
    )
)]
pub async fn complete_maths(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RoomView>, AppError> {
    let code = parse_code(&code)?;
    let token = participant_token(&headers)?;
    let host = writers::host_writer(&state, token, &code).await?;
    transition_service::complete_maths(&host).await?;
    Ok(Json(
        room_service::room_view(&state, &code, Some(token)).await?,
    ))
}

/// Point-read the full room view; the participant token is optional and
/// only adds the navigation hint.
#[utoipa::path(
    get,
    path = "/rooms/{code}",
    tag = "room",
    params(("code" = String, Path, description = "Room code")),
    responses(
        (status = 200, description = "Current room view", body = RoomView)
    )
)]
pub async fn room_view(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RoomView>, AppError> {
    let code = parse_code(&code)?;
    let token = headers
        .get(PARTICIPANT_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());
    Ok(Json(room_service::room_view(&state, &code, token).await?))
}
