use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Liveness of a single player as seen by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    /// Player the answer is about.
    pub player_id: Uuid,
    /// Whether a heartbeat was seen recently.
    pub online: bool,
}
