//! Client implementation.
//!
//! The client maintains:
//! - One TCP stream: identity line out, then JSON lines both ways
//! - The local player's state, reported with `pos` updates
//! - The map rows received after the handshake
//! - Snapshot history for interpolation

use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use anyhow::Context;
use arena_shared::{
    config::ArenaConfig,
    net::{decode_line, LineReader, LineWriter, NetMsg, StatePayload},
    state::PlayerState,
};
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpStream,
};
use tracing::{debug, info};

use crate::{
    color::{parse_color_input, Rgba},
    input::{integrate, InputState},
    interp::SnapshotBuffer,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// Identity sent, waiting for the map.
    Connected,
    /// Map received; snapshots are flowing.
    Ready,
    /// Server closed the stream or a write failed.
    Disconnected,
}

/// High-level game client.
pub struct GameClient {
    pub name: String,
    pub state: ClientState,
    /// Colour string sent with every update.
    pub color: String,
    pub rgba: Rgba,
    /// Locally simulated player; colour and health are overwritten on send.
    pub local: PlayerState,
    /// Held movement input, applied by [`advance`](Self::advance).
    pub input: InputState,
    pub map: Option<Vec<String>>,
    pub snaps: SnapshotBuffer,
    last_snapshot_at: Option<Instant>,

    reader: LineReader<OwnedReadHalf>,
    writer: LineWriter<OwnedWriteHalf>,
    peer: SocketAddr,
}

impl GameClient {
    /// Connects to a server and sends the identity handshake.
    pub async fn connect(cfg: &ArenaConfig) -> anyhow::Result<Self> {
        let name = cfg.player_name.trim().to_string();
        if name.is_empty() {
            anyhow::bail!("player name required");
        }

        info!(server = %cfg.server_addr, name = %name, "Connecting to server");
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&cfg.server_addr))
            .await
            .context("tcp connect timed out")?
            .context("tcp connect")?;
        let peer = stream.peer_addr().context("peer_addr")?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "set_nodelay failed");
        }

        let (rd, wr) = stream.into_split();
        let mut writer = LineWriter::new(wr);
        writer.send_identity(&name).await?;

        let (rgba, color) = parse_color_input(&cfg.player_color);
        let local = PlayerState {
            color: color.clone(),
            ..Default::default()
        };

        info!(%peer, "Connected to server");
        Ok(Self {
            name,
            state: ClientState::Connected,
            color,
            rgba,
            local,
            input: InputState::default(),
            map: None,
            snaps: SnapshotBuffer::new(32),
            last_snapshot_at: None,
            reader: LineReader::new(rd),
            writer,
            peer,
        })
    }

    /// Moves the local player by `dt` seconds of the held input.
    pub fn advance(&mut self, dt: f64) {
        integrate(&mut self.local, self.input, dt);
    }

    /// Sends the local state. Health is echoed from the latest snapshot so a
    /// damaged player does not heal itself.
    pub async fn send_position(&mut self) -> anyhow::Result<()> {
        if let Some(hp) = self.snaps.latest(&self.name).map(|p| p.hp) {
            self.local.hp = hp;
        }
        self.local.color.clone_from(&self.color);
        let msg = NetMsg::pos(&self.local);
        self.send(&msg).await
    }

    pub async fn shoot(&mut self, target: &str) -> anyhow::Result<()> {
        self.send(&NetMsg::Shoot {
            target: target.to_string(),
        })
        .await
    }

    /// Says goodbye and closes the stream.
    pub async fn disconnect(&mut self) -> anyhow::Result<()> {
        let res = self.send(&NetMsg::Bye).await;
        self.state = ClientState::Disconnected;
        res
    }

    async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        let res = self.writer.send(msg).await;
        if res.is_err() {
            self.state = ClientState::Disconnected;
        }
        res
    }

    /// Waits up to `timeout` for one server message and applies it.
    ///
    /// Returns `Ok(None)` on timeout. Undecodable lines are skipped.
    pub async fn poll(&mut self, timeout: Duration) -> anyhow::Result<Option<NetMsg>> {
        let line = match tokio::time::timeout(timeout, self.reader.next_line()).await {
            Err(_) => return Ok(None),
            Ok(res) => res,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                self.state = ClientState::Disconnected;
                anyhow::bail!("server closed connection");
            }
            Err(e) => {
                self.state = ClientState::Disconnected;
                return Err(e);
            }
        };

        match decode_line(&line) {
            Ok(msg) => {
                self.handle_message(&msg);
                Ok(Some(msg))
            }
            Err(e) => {
                debug!(error = %e, "Skipping undecodable line");
                Ok(None)
            }
        }
    }

    /// Polls until a snapshot arrives or `timeout` elapses.
    pub async fn wait_snapshot(&mut self, timeout: Duration) -> anyhow::Result<Option<StatePayload>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            if left.is_zero() {
                return Ok(None);
            }
            if let Some(NetMsg::State { payload }) = self.poll(left).await? {
                return Ok(Some(payload));
            }
        }
    }

    fn handle_message(&mut self, msg: &NetMsg) {
        match msg {
            NetMsg::Map { payload } => {
                info!(rows = payload.map.len(), "Server sent map");
                self.map = Some(payload.map.clone());
                self.state = ClientState::Ready;
            }
            NetMsg::State { payload } => {
                self.snaps.push(payload.clone());
                self.last_snapshot_at = Some(Instant::now());
            }
            other => debug!(?other, "Unexpected message from server"),
        }
    }

    /// Latest replicated players, own entry included.
    pub fn players(&self) -> Option<&StatePayload> {
        self.snaps.last_snapshot()
    }

    /// Our own entry in the latest snapshot.
    pub fn own_state(&self) -> Option<&PlayerState> {
        self.snaps.latest(&self.name)
    }

    /// Position of `identity` interpolated between the two newest snapshots,
    /// trailing the server by one snapshot interval.
    pub fn smoothed_position(&self, identity: &str) -> Option<(f64, f64, f64)> {
        let since = self.last_snapshot_at?.elapsed().as_secs_f64();
        let gap = self.snaps.spacing().filter(|g| *g > 0.0)?;
        self.snaps.interp_player(identity, since / gap)
    }

    pub fn server_peer(&self) -> SocketAddr {
        self.peer
    }
}
