use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use tokio::sync::watch;
use uuid::Uuid;

use crate::dao::models::{PlayerEntity, RoomBundle, RoomCode, RoundEntity};
use crate::dao::room_store::{RoomStore, RoomWatch, TxDecision, TxFn, TxOutcome};
use crate::dao::storage::{StorageError, StorageResult};

use super::changes::run_changes_feed;
use super::config::CouchConfig;
use super::error::{CouchDaoError, CouchResult};
use super::models::{CouchRoomDocument, room_doc_id};

/// CouchDB-backed [`RoomStore`]. One document per room bundle; `_rev`
/// mismatches surface as [`StorageError::Conflict`].
#[derive(Clone)]
pub struct CouchRoomStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
    watchers: Arc<DashMap<RoomCode, watch::Sender<RoomBundle>>>,
}

impl CouchRoomStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
            watchers: Arc::new(DashMap::new()),
        };

        store.ensure_database().await?;
        Ok(store)
    }

    pub(super) fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        let builder = self.client.request(method, url);
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = format!("{}/{}", self.base_url, self.database);
        let mut builder = self.client.get(&url);
        if let Some((ref user, ref pass)) = self.auth {
            builder = builder.basic_auth(user.as_ref(), Some(pass.as_ref()));
        }

        let response = builder
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let mut builder = self.client.put(&url);
                if let Some((ref user, ref pass)) = self.auth {
                    builder = builder.basic_auth(user.as_ref(), Some(pass.as_ref()));
                }
                let create =
                    builder
                        .send()
                        .await
                        .map_err(|source| CouchDaoError::DatabaseCreate {
                            database: database.clone(),
                            source,
                        })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document(&self, doc_id: &str) -> CouchResult<Option<CouchRoomDocument>> {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<CouchRoomDocument>()
                .await
                .map(Some)
                .map_err(|source| CouchDaoError::DecodeResponse {
                    path: doc_id.to_string(),
                    source,
                }),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    /// PUT a document; a 409 means the revision (or the fresh id) lost a
    /// race and is reported as a storage conflict.
    async fn put_document(&self, document: &CouchRoomDocument) -> StorageResult<()> {
        let response = self
            .request(Method::PUT, &document.id)
            .json(document)
            .send()
            .await
            .map_err(|source| {
                StorageError::from(CouchDaoError::RequestSend {
                    path: document.id.clone(),
                    source,
                })
            })?;

        match response.status() {
            StatusCode::CONFLICT => Err(StorageError::conflict(
                document.bundle.room.code.as_str(),
            )),
            status if status.is_success() => Ok(()),
            other => Err(CouchDaoError::RequestStatus {
                path: document.id.clone(),
                status: other,
            }
            .into()),
        }
    }

    /// Push a freshly written bundle to local subscribers so they do not
    /// have to wait for the `_changes` feed to observe our own write.
    fn notify_local(&self, bundle: &RoomBundle) {
        if let Some(sender) = self.watchers.get(&bundle.room.code) {
            let _ = sender.send(bundle.clone());
        }
    }
}

impl RoomStore for CouchRoomStore {
    fn create_room(&self, bundle: RoomBundle) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let document = CouchRoomDocument::fresh(bundle);
            store.put_document(&document).await?;
            store.notify_local(&document.bundle);
            Ok(())
        })
    }

    fn find_room(&self, code: RoomCode) -> BoxFuture<'static, StorageResult<Option<RoomBundle>>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = store.get_document(&room_doc_id(&code)).await?;
            Ok(doc.map(|doc| doc.bundle))
        })
    }

    fn find_round(
        &self,
        code: RoomCode,
        round: u8,
    ) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = store.get_document(&room_doc_id(&code)).await?;
            Ok(doc.and_then(|doc| doc.bundle.rounds.get(&round).cloned()))
        })
    }

    fn find_player(
        &self,
        code: RoomCode,
        uid: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = store.get_document(&room_doc_id(&code)).await?;
            Ok(doc.and_then(|doc| doc.bundle.players.get(&uid).cloned()))
        })
    }

    fn transact(
        &self,
        code: RoomCode,
        decide: TxFn,
    ) -> BoxFuture<'static, StorageResult<TxOutcome>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = room_doc_id(&code);
            let current = store
                .get_document(&doc_id)
                .await?
                .ok_or_else(|| StorageError::not_found(code.as_str()))?;

            match decide(&current.bundle) {
                TxDecision::Abort => Ok(TxOutcome::Aborted),
                TxDecision::Commit(next) => {
                    let document = CouchRoomDocument {
                        id: doc_id,
                        rev: current.rev,
                        bundle: *next,
                    };
                    store.put_document(&document).await?;
                    store.notify_local(&document.bundle);
                    Ok(TxOutcome::Committed)
                }
            }
        })
    }

    fn watch_room(&self, code: RoomCode) -> BoxFuture<'static, StorageResult<RoomWatch>> {
        let store = self.clone();
        Box::pin(async move {
            if let Some(sender) = store.watchers.get(&code) {
                return Ok(sender.subscribe());
            }

            let bundle = store
                .get_document(&room_doc_id(&code))
                .await?
                .ok_or_else(|| StorageError::not_found(code.as_str()))?
                .bundle;

            use dashmap::mapref::entry::Entry;
            let (sender, receiver) = watch::channel(bundle);
            match store.watchers.entry(code.clone()) {
                Entry::Occupied(existing) => return Ok(existing.get().subscribe()),
                Entry::Vacant(slot) => {
                    slot.insert(sender.clone());
                }
            }
            tokio::spawn(run_changes_feed(store.clone(), code, sender));
            Ok(receiver)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = format!("{}/{}", store.base_url, store.database);
            let mut builder = store.client.get(&url);
            if let Some((ref user, ref pass)) = store.auth {
                builder = builder.basic_auth(user.as_ref(), Some(pass.as_ref()));
            }

            let response = builder
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
