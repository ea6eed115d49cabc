//! Helpers shared by the socket-level integration tests.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use arena_server::{server::bind_ephemeral, GameServer};
use arena_shared::{
    config::ArenaConfig,
    net::{decode_line, LineReader, LineSink, LineWriter, NetMsg, StatePayload},
};
use tokio::{
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    task::JoinHandle,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Running server on an ephemeral port.
pub struct TestServer {
    pub server: Arc<GameServer>,
    pub cfg: ArenaConfig,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn start(tick: Duration) -> anyhow::Result<Self> {
        let (server, cfg) = bind_ephemeral(tick).await?;
        let server = Arc::new(server);
        let task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.run().await })
        };
        Ok(Self { server, cfg, task })
    }

    pub fn addr(&self) -> &str {
        &self.cfg.server_addr
    }

    /// Config a client would use to reach this server.
    pub fn client_config(&self, name: &str) -> ArenaConfig {
        ArenaConfig {
            player_name: name.to_string(),
            ..self.cfg.clone()
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A bare protocol peer speaking raw lines.
pub struct RawPeer {
    reader: LineReader<OwnedReadHalf>,
    writer: LineWriter<OwnedWriteHalf>,
}

impl RawPeer {
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        let (rd, wr) = stream.into_split();
        Ok(Self {
            reader: LineReader::new(rd),
            writer: LineWriter::new(wr),
        })
    }

    /// Connects, sends `name` and waits for the map that confirms registration.
    pub async fn join(addr: &str, name: &str) -> anyhow::Result<Self> {
        let mut peer = Self::connect(addr).await?;
        peer.writer.send_identity(name).await?;
        match peer.recv(Duration::from_secs(2)).await? {
            Some(NetMsg::Map { .. }) => Ok(peer),
            other => anyhow::bail!("expected map after handshake, got {other:?}"),
        }
    }

    pub async fn send_raw(&mut self, raw: &str) -> anyhow::Result<()> {
        self.writer.send_line(raw.as_bytes()).await
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        self.writer.send(msg).await
    }

    /// Next decoded message; `None` if the server closed the stream.
    pub async fn recv(&mut self, timeout: Duration) -> anyhow::Result<Option<NetMsg>> {
        let line = tokio::time::timeout(timeout, self.reader.next_line())
            .await
            .context("no message before timeout")??;
        line.map(|l| decode_line(&l)).transpose()
    }

    /// Waits for a snapshot satisfying `pred`, skipping others.
    pub async fn state_where<F>(&mut self, timeout: Duration, pred: F) -> anyhow::Result<StatePayload>
    where
        F: Fn(&StatePayload) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.recv(left).await? {
                Some(NetMsg::State { payload }) if pred(&payload) => return Ok(payload),
                Some(_) => continue,
                None => anyhow::bail!("server closed connection"),
            }
        }
    }

    /// Half-closes the write side, like a client quitting.
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.writer.close().await
    }
}
