//! `arena_server`
//!
//! Authoritative state-sync server:
//! - Accepts TCP connections, one task per connection
//! - Identity handshake, then line-delimited JSON updates
//! - Single-lock session registry holding every player's state
//! - Fixed-interval snapshot broadcast to every connection
//!
//! Networking model: one TCP stream per player carries both directions.

pub mod broadcast;
pub mod registry;
pub mod server;
pub mod session;

pub use server::GameServer;
