//! Server implementation.
//!
//! Owns the TCP listener, the session registry and the world map. Every
//! accepted connection gets its own task running
//! [`handle_connection`](crate::session::handle_connection); a separate task
//! runs the [`Broadcaster`]. Only binding can fail the server as a whole.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use arena_shared::{config::ArenaConfig, map::WorldMap};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    broadcast::Broadcaster,
    registry::Registry,
    session::{handle_connection, SessionContext},
};

/// Back-off after a failed `accept`, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Game server.
pub struct GameServer {
    cfg: ArenaConfig,
    listener: TcpListener,
    registry: Arc<Registry>,
    map: Arc<WorldMap>,
}

impl GameServer {
    /// Binds the listener and loads the map named in the config.
    pub async fn bind(cfg: ArenaConfig) -> anyhow::Result<Self> {
        let map = WorldMap::load_or_default(&cfg.map_file).await?;
        Self::bind_with_map(cfg, map).await
    }

    pub async fn bind_with_map(cfg: ArenaConfig, map: WorldMap) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self {
            cfg,
            listener,
            registry: Arc::new(Registry::new()),
            map: Arc::new(map),
        })
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.cfg
    }

    pub fn map(&self) -> &WorldMap {
        &self.map
    }

    /// Read access for diagnostics and embedding layers.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster::new(self.registry(), &self.cfg)
    }

    pub fn spawn_broadcaster(&self) -> JoinHandle<()> {
        tokio::spawn(self.broadcaster().run())
    }

    fn session_context(&self) -> SessionContext {
        SessionContext::new(self.registry(), Arc::clone(&self.map), &self.cfg)
    }

    /// Accepts exactly one connection and spawns its handler.
    pub async fn accept_one(&self) -> anyhow::Result<SocketAddr> {
        let (stream, peer) = self.listener.accept().await.context("tcp accept")?;
        self.spawn_session(stream, peer);
        Ok(peer)
    }

    /// Runs the broadcaster and accepts connections until the task is dropped.
    pub async fn run(&self) -> anyhow::Result<()> {
        let ticker = self.spawn_broadcaster();
        info!(
            tick = ?self.broadcaster().interval(),
            rows = self.map.height(),
            "Accepting connections"
        );
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => self.spawn_session(stream, peer),
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    if ticker.is_finished() {
                        anyhow::bail!("broadcaster stopped");
                    }
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "set_nodelay failed");
        }
        let ctx = self.session_context();
        tokio::spawn(async move {
            let (rd, wr) = stream.into_split();
            match handle_connection(ctx, rd, wr, Some(peer)).await {
                Ok(end) => debug!(%peer, ?end, "Session finished"),
                Err(e) => debug!(%peer, error = %e, "Session failed"),
            }
        });
    }

    /// Executes a console command.
    pub async fn exec_console(&self, line: &str) -> Vec<String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(cmd) = tokens.first() else {
            return Vec::new();
        };

        match *cmd {
            "status" => {
                let mut out = Vec::new();
                match self.local_addr() {
                    Ok(addr) => out.push(format!("Listening: {addr}")),
                    Err(e) => out.push(format!("Listening: unknown ({e})")),
                }
                out.push(format!("Tick: {:?}", self.cfg.tick_interval()));
                out.push(format!("Map: {}x{}", self.map.width(), self.map.height()));
                out.push(format!("Players: {}", self.registry.len().await));
                out
            }
            "players" => {
                let sessions = self.registry.sessions().await;
                if sessions.is_empty() {
                    return vec!["No players connected".to_string()];
                }
                sessions
                    .into_iter()
                    .map(|s| {
                        let peer = s
                            .peer
                            .map_or_else(|| "-".to_string(), |p| p.to_string());
                        format!(
                            "  {} @ {}: pos=({:.2}, {:.2}, {:.2}) hp={} color={} idle={:.1}s",
                            s.identity,
                            peer,
                            s.state.x,
                            s.state.y,
                            s.state.z,
                            s.state.hp,
                            s.state.color,
                            s.since_update.as_secs_f64()
                        )
                    })
                    .collect()
            }
            "kick" => {
                let Some(name) = tokens.get(1) else {
                    return vec!["Usage: kick <name>".to_string()];
                };
                if self.registry.kick(name).await {
                    vec![format!("Kicked {name}")]
                } else {
                    vec![format!("No player named {name}")]
                }
            }
            other => vec![format!("Unknown command: {other}")],
        }
    }
}

/// Helper for tests: bind to an ephemeral localhost port.
pub async fn bind_ephemeral(tick_interval: Duration) -> anyhow::Result<(GameServer, ArenaConfig)> {
    let cfg = ArenaConfig {
        server_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).to_string(),
        tick_interval_ms: tick_interval.as_millis().max(1) as u64,
        write_timeout_ms: 500,
        ..Default::default()
    };
    let server = GameServer::bind_with_map(cfg, WorldMap::default()).await?;
    let mut cfg = server.config().clone();
    cfg.server_addr = server.local_addr()?.to_string();
    Ok((server, cfg))
}
