//! Persistence layer: the shared-state schema, the store abstraction, and
//! its backends.

#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
pub mod models;
pub mod room_store;
pub mod storage;
