//! clich daemon - Client registry and broadcast hub
//!
//! This crate provides the core infrastructure for the clich daemon:
//! - `registry` - Lock-protected map of connected clients
//! - `hub` - Fan-out of inbound frames to every registered connection
//! - `server` - TCP and WebSocket listeners and per-connection sessions
//! - `transport` - Frame source/sink seam between sessions and sockets
//! - `auth` - Admission credential verification
//! - `config` - TOML daemon configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       clichd daemon                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │HubServer/WsServer│    │       BroadcastHub          │   │
//! │  │ (TCP, /ws)      │     │  ClientRegistry + permits   │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │ accept                      │ publish           │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ConnectionSession│────▶│  bounded write tasks        │   │
//! │  │   (per peer)    │     │  (one per target peer)      │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate avoids `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()` and `todo!()`. Per-connection failures end
//! that connection only; the hub itself has no failed state.

pub mod auth;
pub mod config;
pub mod hub;
pub mod registry;
pub mod server;
pub mod transport;
