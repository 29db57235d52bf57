use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::dao::models::SessionEntity;

/// Conditional replacement of a session row.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSessionRequest {
    /// New row content.
    #[validate(nested)]
    pub session: SessionEntity,
    /// `revision` the stored row must still hold for the write to apply.
    pub expected_revision: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::session::{GameSession, Seats};
    use uuid::Uuid;

    #[test]
    fn nested_row_is_validated() {
        let seats = Seats {
            a: Uuid::new_v4(),
            b: Uuid::new_v4(),
        };
        let mut request = UpdateSessionRequest {
            session: GameSession::new("couple-42", seats, seats.a).into(),
            expected_revision: 0,
        };
        assert!(request.validate().is_ok());

        request.session.session_id = "couple 42".into();
        assert!(request.validate().is_err());
    }
}
