//! Configuration system.
//!
//! Loads arena configuration from JSON strings or files. Every field has a
//! default so a partial file only overrides what it names.

use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Server listen (or connect) address, e.g. `0.0.0.0:6000`.
    pub server_addr: String,
    /// Milliseconds between snapshot broadcasts.
    pub tick_interval_ms: u64,
    /// Upper bound on a single connection write.
    pub write_timeout_ms: u64,
    /// Optional read deadline; `None` waits for the peer indefinitely.
    pub read_timeout_ms: Option<u64>,
    /// Map file served to clients after the handshake.
    pub map_file: String,
    /// Player name (client only).
    pub player_name: String,
    /// Body colour as typed by the player (client only).
    pub player_color: String,
    /// Milliseconds between position updates (client only).
    pub send_interval_ms: u64,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:6000".to_string(),
            tick_interval_ms: 1000,
            write_timeout_ms: 2000,
            read_timeout_ms: None,
            map_file: "1.map".to_string(),
            player_name: "Player".to_string(),
            player_color: "red".to_string(),
            send_interval_ms: 1000,
        }
    }
}

impl ArenaConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.max(1))
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms.max(1))
    }
}
