//! Library surface of the sync server, split out from `main.rs` so
//! integration tests can drive the [`app::router`] directly with
//! `tower::ServiceExt::oneshot` instead of binding a real socket.

pub mod app;
pub mod config;
pub mod convert;
pub mod db;
pub mod http;
pub mod mail;
pub mod timer;
