//! In-process store backend. Always compiled: single-node deployments use
//! it directly and the service tests run against it.

mod store;

pub use store::MemoryRoomStore;
