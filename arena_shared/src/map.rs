//! Tile map served to clients after the handshake.
//!
//! A map file is plain text, one row per line. `#` is wall, `~` is water and
//! anything else is floor; the server never interprets the characters.

use std::path::Path;

use anyhow::Context;
use tracing::info;

const DEFAULT_ROWS: [&str; 8] = [
    "############",
    "#..........#",
    "#..~~..##..#",
    "#..~~......#",
    "#......##..#",
    "#..##......#",
    "#..........#",
    "############",
];

/// Ordered list of map rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldMap {
    pub rows: Vec<String>,
}

impl Default for WorldMap {
    fn default() -> Self {
        Self {
            rows: DEFAULT_ROWS.iter().map(|r| (*r).to_string()).collect(),
        }
    }
}

impl WorldMap {
    pub fn parse(text: &str) -> Self {
        Self {
            rows: text
                .lines()
                .map(|l| l.trim_end_matches('\r').to_string())
                .collect(),
        }
    }

    /// Loads a map file, falling back to the built-in grid when it is missing.
    pub async fn load_or_default(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Map file not found, using built-in map");
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("read map {}", path.display())),
        }
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.rows.iter().map(|r| r.chars().count()).max().unwrap_or(0)
    }
}
