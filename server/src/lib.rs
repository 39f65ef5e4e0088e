//! # State-Sync Server Library
//!
//! Authoritative server for a small real-time multiplayer session. It tracks
//! every joined player's transient state (position, facing, movement state,
//! optional rope anchor) and rebroadcasts a consistent snapshot to all clients
//! at a fixed rate.
//!
//! ## Architecture
//!
//! ### Single Event Loop
//! One task owns the [`registry::Registry`] and the [`session::SessionTable`].
//! Connection tasks forward parsed frames over a channel and the loop applies
//! them one at a time, interleaved with broadcast ticks. Nothing else touches
//! the registry, so it needs no lock.
//!
//! ### WebSocket Transport
//! Each client holds one WebSocket carrying JSON text frames tagged with a
//! `type` field (see the `shared` crate). Writes are queued on a per-session
//! channel and never block the event loop.
//!
//! ### Trust Model
//! Clients are assumed friendly and on a local network. Malformed frames are
//! logged and dropped, invalid settings fields are silently ignored, and only
//! capacity is enforced with an explicit `server_full` reply.
//!
//! ## Module Organization
//!
//! - `registry`: joined players' records and field validation
//! - `session`: per-connection join/leave lifecycle and message dispatch
//! - `broadcast`: the fixed-rate snapshot loop
//! - `relay`: stateless forwarding of peer-to-peer negotiation payloads
//! - `network`: TCP/WebSocket plumbing, the event loop, and `/health`
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     server.run().await
//! }
//! ```

pub mod broadcast;
pub mod network;
pub mod registry;
pub mod relay;
pub mod session;
