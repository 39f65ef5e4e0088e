//! # State-Sync Client Library
//!
//! Client side of the state-sync protocol: one persistent WebSocket to the
//! server, automatic reconnection, and smoothing of remote players so they move
//! fluidly between 20 Hz snapshots.
//!
//! ## Architecture
//!
//! ### Network Adapter
//! [`network::NetworkAdapter`] owns the connection in a background task. The
//! game layer talks to it through fire-and-forget `send_*` calls and receives
//! [`network::ClientEvent`]s on a channel. The local player's own entry is
//! removed from every snapshot before it is delivered.
//!
//! ### Reconnection
//! An unexpected close schedules a new attempt after a fixed delay. An explicit
//! `disconnect()` cancels it, and a `server_full` rejection stops retrying.
//! The driver task is the only writer of the connection status, which can be
//! watched through `subscribe_status()`.
//!
//! ### Remote Player Smoothing
//! [`reconcile::RemotePlayers`] eases each displayed transform toward the last
//! reported one using an exponential blend, and rotates along the shorter arc.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{AdapterConfig, NetworkAdapter};
//! use client::reconcile::RemotePlayers;
//! use shared::DEFAULT_INTERPOLATION_RATE;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (mut adapter, mut events) = NetworkAdapter::new(AdapterConfig::default());
//!     let mut remotes = RemotePlayers::new(DEFAULT_INTERPOLATION_RATE);
//!
//!     adapter.connect("Alice").await;
//!     while let Some(event) = events.recv().await {
//!         remotes.apply_event(&event);
//!     }
//! }
//! ```

pub mod network;
pub mod reconcile;
