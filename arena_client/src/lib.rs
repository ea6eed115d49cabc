//! `arena_client`
//!
//! Headless client-side systems:
//! - Connection management (identity handshake + JSON lines)
//! - Local movement model and periodic position reports
//! - Snapshot history and interpolation for remote players
//! - Colour input parsing

pub mod client;
pub mod color;
pub mod input;
pub mod interp;

pub use client::GameClient;
