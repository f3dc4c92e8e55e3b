use serde::Serialize;
use utoipa::ToSchema;

use crate::dao::models::Phase;
use crate::state::room::LocalView;

/// Where the authenticated participant's UI belongs right now. This is the
/// self-heal hint of the acknowledgment protocol: `waiting` distinguishes a
/// pure wait state from a screen that still owes input.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalViewDto {
    /// Screen the participant should be on.
    pub screen: Phase,
    /// True when the participant already acknowledged and waits for the peer.
    pub waiting: bool,
}

impl From<LocalView> for LocalViewDto {
    fn from(view: LocalView) -> Self {
        match view {
            LocalView::Input(screen) => Self {
                screen,
                waiting: false,
            },
            LocalView::Waiting(screen) => Self {
                screen,
                waiting: true,
            },
        }
    }
}
