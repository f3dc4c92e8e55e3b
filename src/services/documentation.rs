use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Quiz Duel Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::room::create_room,
        crate::routes::room::join_room,
        crate::routes::room::unseal_room,
        crate::routes::room::start_match,
        crate::routes::room::submit_answers,
        crate::routes::room::submit_verdicts,
        crate::routes::room::ack_marking,
        crate::routes::room::ack_award,
        crate::routes::room::complete_maths,
        crate::routes::room::room_view,
        crate::routes::sse::room_events,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::room::CreateRoomRequest,
            crate::dto::room::RoundSeedInput,
            crate::dto::room::QuestionItemInput,
            crate::dto::room::RoomCreated,
            crate::dto::room::JoinedRoom,
            crate::dto::room::SubmitAnswersRequest,
            crate::dto::room::AnswerInput,
            crate::dto::room::SubmitVerdictsRequest,
            crate::dto::room::AckRequest,
            crate::dto::room::RoomView,
            crate::dto::room::RoundView,
            crate::dto::room::TimingView,
            crate::dto::room::PlayerSummary,
            crate::dto::room::AcksView,
            crate::dto::room::ScoresView,
            crate::dto::room::AnswersView,
            crate::dto::room::MarkingView,
            crate::dto::phase::LocalViewDto,
            crate::dto::sse::Handshake,
            crate::dao::models::Phase,
            crate::dao::models::Role,
            crate::dao::models::Verdict,
            crate::dao::models::AnswerEntity,
            crate::dao::models::QuestionItemEntity,
        )
    ),
    tags(
        (name = "room", description = "Room lifecycle and participant writes"),
        (name = "sse", description = "Server-sent room change notifications"),
        (name = "health", description = "Health check endpoints"),
    )
)]
pub struct ApiDoc;
