//! # fanout-relay
//!
//! `fanout-relay` pushes events from one upstream pub/sub source to many
//! connected clients in real time. Every event received on a channel is
//! delivered, in publish order, to every client connected to that channel's
//! topic at the time, over server-sent events or WebSockets.
//!
//! ## Core Modules
//!
//! - `hub`: the per-topic registry of clients and the broadcast path.
//! - `upstream`: the pub/sub source abstraction (Redis, in-memory) and the
//!   listener loop that feeds a hub.
//! - `transport`: the HTTP router, event-stream and WebSocket front ends.
//! - `config`: layered configuration loading.
//! - `utils`: error types and logging setup.

pub mod config;
pub mod hub;
pub mod transport;
pub mod upstream;
pub mod utils;
