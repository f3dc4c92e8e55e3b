use std::time::Duration;

use reqwest::Method;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::dao::models::{RoomBundle, RoomCode};

use super::models::{ChangesResponse, CouchRoomDocument, room_doc_id};
use super::store::CouchRoomStore;

/// Longpoll timeout requested from CouchDB, milliseconds.
const FEED_TIMEOUT_MS: u64 = 30_000;
/// Delay before re-polling after a feed error.
const FEED_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Bridge one room's `_changes` feed into its watch channel. Runs until the
/// last subscriber is gone.
pub(super) async fn run_changes_feed(
    store: CouchRoomStore,
    code: RoomCode,
    sender: watch::Sender<RoomBundle>,
) {
    let doc_id = room_doc_id(&code);
    let mut since = String::from("now");

    loop {
        if sender.is_closed() {
            debug!(room = %code, "last subscriber gone; stopping changes feed");
            return;
        }

        let path = format!(
            "_changes?feed=longpoll&filter=_doc_ids&include_docs=true&timeout={FEED_TIMEOUT_MS}&since={since}"
        );
        let request = store
            .request(Method::POST, &path)
            .json(&json!({ "doc_ids": [doc_id] }));

        let response = match request.send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(room = %code, status = %response.status(), "changes feed poll rejected");
                sleep(FEED_RETRY_DELAY).await;
                continue;
            }
            Err(err) => {
                warn!(room = %code, error = %err, "changes feed poll failed");
                sleep(FEED_RETRY_DELAY).await;
                continue;
            }
        };

        let payload = match response.json::<ChangesResponse>().await {
            Ok(payload) => payload,
            Err(err) => {
                warn!(room = %code, error = %err, "changes feed payload undecodable");
                sleep(FEED_RETRY_DELAY).await;
                continue;
            }
        };

        since = match payload.last_seq {
            serde_json::Value::String(seq) => seq,
            other => other.to_string(),
        };

        for row in payload.results {
            let Some(doc) = row.doc else { continue };
            match serde_json::from_value::<CouchRoomDocument>(doc) {
                Ok(document) => {
                    let _ = sender.send(document.bundle);
                }
                Err(err) => {
                    warn!(room = %code, doc = %row.id, error = %err, "skipping undecodable change");
                }
            }
        }
    }
}
