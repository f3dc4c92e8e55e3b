use serde::{Deserialize, Serialize};

use crate::dao::models::{RoomBundle, RoomCode};

/// Document id prefix for room bundles.
pub const ROOM_PREFIX: &str = "room:";

/// Compute the CouchDB document id for a room bundle.
pub fn room_doc_id(code: &RoomCode) -> String {
    format!("{ROOM_PREFIX}{code}")
}

/// CouchDB envelope around a room bundle: the bundle fields are flattened
/// next to the `_id`/`_rev` bookkeeping CouchDB requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchRoomDocument {
    /// Document id (`room:<code>`).
    #[serde(rename = "_id")]
    pub id: String,
    /// Revision token; absent on first insert. This is the compare half of
    /// the store's compare-and-update contract.
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// The room bundle payload.
    #[serde(flatten)]
    pub bundle: RoomBundle,
}

impl CouchRoomDocument {
    /// Wrap a bundle for insertion (no revision yet).
    pub fn fresh(bundle: RoomBundle) -> Self {
        Self {
            id: room_doc_id(&bundle.room.code),
            rev: None,
            bundle,
        }
    }
}

/// Response shape of the `_changes` feed.
#[derive(Debug, Deserialize)]
pub struct ChangesResponse {
    /// Changed rows since the requested sequence.
    pub results: Vec<ChangeRow>,
    /// Sequence token to resume from.
    pub last_seq: serde_json::Value,
}

/// One `_changes` row; `doc` is present because the feed is requested with
/// `include_docs=true`.
#[derive(Debug, Deserialize)]
pub struct ChangeRow {
    /// Changed document id.
    pub id: String,
    /// Full document body.
    pub doc: Option<serde_json::Value>,
}
