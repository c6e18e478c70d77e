//! The `transport` module exposes hubs to clients over HTTP.
//!
//! Each topic gets event-stream endpoints (server push only) and optionally a
//! WebSocket endpoint (push plus client-originated broadcasts). Both attach
//! clients to the topic's hub the same way and differ only in framing and in
//! whether inbound frames are read.

pub mod server;
pub mod sse;
pub mod websocket;

pub use server::{TopicRoute, build_router, serve};
