/// Per-round acknowledgment handshake.
pub mod ack_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Per-room host driver reacting to change notifications.
pub mod driver;
/// Snippet race finalizer.
pub mod finalize_service;
/// Health check service.
pub mod health_service;
/// Retry supervisor for finalizer-class transactions.
pub mod retry;
/// Room lifecycle: creation, joining, unsealing, match start.
pub mod room_service;
/// Answer and verdict submission.
pub mod round_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events bridging service.
pub mod sse_service;
/// Storage connection supervisor with degraded-mode handling.
pub mod storage_supervisor;
/// Timing capture for the snippet race.
pub mod timing_service;
/// Host-only phase transitions.
pub mod transition_service;
/// Typed per-role writer handles.
pub mod writers;
