//! Core library for the collaborative scripture-editing platform: chapter
//! storage, USFM parsing, three-way merge, the checksum ladder used by the
//! sync protocol, session/role logic, the change ledger, and the save
//! pipeline that ties them together. The HTTP transport, embedded
//! database, and mail notifications live in the `scriptura-server` binary
//! crate, which depends on this one.

pub mod access;
pub mod books;
pub mod change;
pub mod checksum;
pub mod merge;
pub mod notify;
pub mod save;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod sync;
pub mod sync_client;
pub mod usfm;
