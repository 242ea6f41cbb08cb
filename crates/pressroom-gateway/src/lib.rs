//! HTTP operator surface for the Pressroom scheduling core.
//!
//! Thin layer over `pressroom_scheduler::PublishingEngine`: routes lock the
//! shared engine, perform one operation, and return a `{"ok": ...}` JSON
//! envelope. The queue processor loop is spawned alongside the server and
//! shares the same engine handle.

pub mod routes;
pub mod server;

pub use server::{AppState, build_engine, build_router, start};
