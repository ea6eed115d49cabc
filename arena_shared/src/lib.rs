//! `arena_shared`
//!
//! Shared libraries used by both client and server.
//!
//! - `state`: replicated player state and its clamping rules.
//! - `net`: line-delimited JSON protocol, codec and async line I/O.
//! - `map`: tile map rows served after the handshake.
//! - `config`: JSON-backed configuration.

pub mod config;
pub mod map;
pub mod net;
pub mod state;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::map::*;
    pub use crate::net::*;
    pub use crate::state::*;
}
