use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::dao::models::{GrantEntity, SessionEntity};

pub const SESSION_PREFIX: &str = "session::";
pub const GRANT_PREFIX: &str = "grant::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    #[allow(dead_code)]
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Session row stored under `session::<sessionId>`, so CouchDB's document id
/// uniqueness enforces one row per session key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchSessionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub session: SessionEntity,
}

impl From<(SessionEntity, Option<String>)> for CouchSessionDocument {
    fn from((session, rev): (SessionEntity, Option<String>)) -> Self {
        Self {
            id: session_doc_id(&session.session_id),
            rev,
            session,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchGrantDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub grant: GrantEntity,
}

impl From<(GrantEntity, Option<String>)> for CouchGrantDocument {
    fn from((grant, rev): (GrantEntity, Option<String>)) -> Self {
        Self {
            id: grant_doc_id(grant.id),
            rev,
            grant,
        }
    }
}

pub fn session_doc_id(session_id: &str) -> String {
    format!("{}{}", SESSION_PREFIX, session_id)
}

pub fn grant_doc_id(id: Uuid) -> String {
    format!("{}{}", GRANT_PREFIX, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::session::{GameSession, Seats};

    #[test]
    fn session_document_flattens_row_next_to_couch_metadata() {
        let seats = Seats {
            a: Uuid::new_v4(),
            b: Uuid::new_v4(),
        };
        let row: SessionEntity = GameSession::new("couple-42", seats, seats.a).into();
        let doc = CouchSessionDocument::from((row.clone(), Some("1-abc".into())));

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["_id"], "session::couple-42");
        assert_eq!(value["_rev"], "1-abc");
        assert_eq!(value["sessionId"], "couple-42");

        let back: CouchSessionDocument = serde_json::from_value(value).unwrap();
        assert_eq!(back.session, row);
    }
}
