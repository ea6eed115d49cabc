//! Per-connection session handler.
//!
//! States:
//! - awaiting handshake: the first line is the identity; EOF or a blank line
//!   ends the session before anything is registered.
//! - active: the identity is registered, the map is sent once, then every
//!   line is decoded and applied. Bad lines are dropped, not fatal.
//! - terminated: the registry entry is removed (if this session still owns
//!   it) and the write side is shut down.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use arena_shared::{
    config::ArenaConfig,
    map::WorldMap,
    net::{
        decode_line, encode_line, parse_pos_payload, LineReader, LineSink, LineWriter, NetMsg,
    },
    state::SHOT_DAMAGE,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::Notify,
    time,
};
use tracing::{debug, info};

use crate::registry::{shared_sink, Registry, SessionId, ShotOutcome};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Connection closed or sent a blank identity before registering.
    NoHandshake,
    /// Peer closed the stream.
    PeerClosed,
    /// Peer sent `bye`.
    Bye,
    /// The registry asked the session to go (kick, reconnect, dead writer).
    Closed,
}

/// Everything a handler needs besides its connection.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<Registry>,
    pub map: Arc<WorldMap>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Duration,
}

impl SessionContext {
    pub fn new(registry: Arc<Registry>, map: Arc<WorldMap>, cfg: &ArenaConfig) -> Self {
        Self {
            registry,
            map,
            read_timeout: cfg.read_timeout(),
            write_timeout: cfg.write_timeout(),
        }
    }
}

/// Drives one connection from handshake to termination.
///
/// Transport errors are returned after the registry entry has been removed.
pub async fn handle_connection<R, W>(
    ctx: SessionContext,
    reader: R,
    writer: W,
    peer: Option<SocketAddr>,
) -> anyhow::Result<SessionEnd>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = LineReader::new(reader);

    let identity = match lines.next_line_timeout(ctx.read_timeout).await? {
        Some(line) => line.trim().to_string(),
        None => return Ok(SessionEnd::NoHandshake),
    };
    if identity.is_empty() {
        debug!(?peer, "Blank identity, closing");
        return Ok(SessionEnd::NoHandshake);
    }

    let sink = shared_sink(LineWriter::new(writer));
    // Hold the writer until the map is out so no snapshot can precede it.
    let mut first_write = sink.lock().await;
    let reg = ctx
        .registry
        .register(&identity, Arc::clone(&sink), peer)
        .await;
    info!(identity = %identity, ?peer, replaced = reg.replaced, "Player connected");

    let sent = send_map(&ctx, &identity, &mut **first_write).await;
    drop(first_write);

    let res = match sent {
        Ok(()) => run_active(&ctx, &identity, reg.session, &reg.closer, &mut lines).await,
        Err(e) => Err(e),
    };

    ctx.registry.remove(&identity, reg.session).await;
    let _ = time::timeout(ctx.write_timeout, async {
        sink.lock().await.close().await
    })
    .await;

    match &res {
        Ok(end) => info!(identity = %identity, reason = ?end, "Player disconnected"),
        Err(e) => info!(identity = %identity, error = %e, "Player dropped"),
    }
    res
}

/// Best-effort: a failed map write leaves the session running.
///
/// A write that times out may have left part of the line on the stream,
/// which would corrupt the next snapshot, so that case ends the session.
async fn send_map(
    ctx: &SessionContext,
    identity: &str,
    sink: &mut dyn LineSink,
) -> anyhow::Result<()> {
    let line = match encode_line(&NetMsg::map(ctx.map.rows.clone())) {
        Ok(line) => line,
        Err(e) => {
            debug!(identity = %identity, error = %e, "Map encode failed");
            return Ok(());
        }
    };
    match time::timeout(ctx.write_timeout, sink.send_line(&line)).await {
        Ok(Ok(())) => debug!(identity = %identity, rows = ctx.map.height(), "Map sent"),
        Ok(Err(e)) => debug!(identity = %identity, error = %e, "Map send failed"),
        Err(_) => anyhow::bail!("map write timed out"),
    }
    Ok(())
}

async fn run_active<R: AsyncRead + Unpin>(
    ctx: &SessionContext,
    identity: &str,
    session: SessionId,
    closer: &Notify,
    lines: &mut LineReader<R>,
) -> anyhow::Result<SessionEnd> {
    loop {
        let next = tokio::select! {
            _ = closer.notified() => return Ok(SessionEnd::Closed),
            next = lines.next_line_timeout(ctx.read_timeout) => next?,
        };
        let Some(line) = next else {
            return Ok(SessionEnd::PeerClosed);
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let msg = match decode_line(line) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(identity = %identity, error = %e, "Discarding line");
                continue;
            }
        };

        match msg {
            NetMsg::Pos { payload } => {
                let upd = parse_pos_payload(&payload);
                if ctx.registry.update(identity, session, &upd).await.is_none() {
                    return Ok(SessionEnd::Closed);
                }
            }
            NetMsg::Shoot { target } => {
                let outcome = ctx
                    .registry
                    .shoot(identity, session, &target, SHOT_DAMAGE)
                    .await;
                match outcome {
                    ShotOutcome::Stale => return Ok(SessionEnd::Closed),
                    ShotOutcome::Killed => {
                        info!(shooter = %identity, target = %target, "Player killed")
                    }
                    other => debug!(shooter = %identity, target = %target, ?other, "Shot"),
                }
            }
            NetMsg::Bye => return Ok(SessionEnd::Bye),
            NetMsg::Map { .. } | NetMsg::State { .. } => {
                debug!(identity = %identity, "Ignoring server-bound message type");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_shared::state::{PlayerState, MAX_HP};
    use tokio::{
        io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf},
        task::JoinHandle,
    };

    struct TestConn {
        to_server: WriteHalf<DuplexStream>,
        from_server: LineReader<ReadHalf<DuplexStream>>,
        task: JoinHandle<anyhow::Result<SessionEnd>>,
    }

    impl TestConn {
        async fn send(&mut self, raw: &str) {
            self.to_server.write_all(raw.as_bytes()).await.unwrap();
        }

        async fn recv(&mut self) -> NetMsg {
            let line = time::timeout(Duration::from_secs(1), self.from_server.next_line())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            decode_line(&line).unwrap()
        }
    }

    fn context(registry: &Arc<Registry>) -> SessionContext {
        SessionContext {
            registry: Arc::clone(registry),
            map: Arc::new(WorldMap::default()),
            read_timeout: None,
            write_timeout: Duration::from_millis(500),
        }
    }

    fn connect(registry: &Arc<Registry>) -> TestConn {
        connect_with(context(registry))
    }

    fn connect_with(ctx: SessionContext) -> TestConn {
        let (client, server) = tokio::io::duplex(4096);
        let (srv_rd, srv_wr) = tokio::io::split(server);
        let (cli_rd, cli_wr) = tokio::io::split(client);
        let task = tokio::spawn(handle_connection(ctx, srv_rd, srv_wr, None));
        TestConn {
            to_server: cli_wr,
            from_server: LineReader::new(cli_rd),
            task,
        }
    }

    async fn settle<F: Fn(&Option<PlayerState>) -> bool>(reg: &Registry, name: &str, pred: F) {
        for _ in 0..100 {
            if pred(&reg.get(name).await) {
                return;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        panic!("registry entry {name} never reached expected state");
    }

    async fn handshake(reg: &Arc<Registry>, name: &str) -> TestConn {
        let mut conn = connect(reg);
        conn.send(&format!("{name}\n")).await;
        let NetMsg::Map { payload } = conn.recv().await else {
            panic!("expected map first");
        };
        assert_eq!(payload.map, WorldMap::default().rows);
        conn
    }

    #[tokio::test]
    async fn closed_before_handshake_has_no_side_effects() {
        let reg = Arc::new(Registry::new());
        let mut conn = connect(&reg);
        conn.to_server.shutdown().await.unwrap();
        let end = conn.task.await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::NoHandshake);
        assert!(reg.is_empty().await);
    }

    #[tokio::test]
    async fn blank_identity_is_rejected() {
        let reg = Arc::new(Registry::new());
        let mut conn = connect(&reg);
        conn.send("   \r\n").await;
        let end = conn.task.await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::NoHandshake);
        assert!(reg.is_empty().await);
    }

    #[tokio::test]
    async fn handshake_registers_trimmed_identity_with_spawn_state() {
        let reg = Arc::new(Registry::new());
        let _conn = handshake(&reg, "  alice ").await;
        assert_eq!(reg.get("alice").await, Some(PlayerState::default()));
    }

    #[tokio::test]
    async fn pos_update_defaults_and_clamps() {
        let reg = Arc::new(Registry::new());
        let mut conn = handshake(&reg, "alice").await;
        conn.send(r##"{"type":"pos","payload":{"x":3,"y":"bad","p":95,"hp":180,"color":"#00ff00"}}"##)
            .await;
        conn.send("\n").await;
        settle(&reg, "alice", |st| st.as_ref().is_some_and(|s| s.x == 3.0)).await;

        let st = reg.get("alice").await.unwrap();
        assert_eq!(st.y, 1.0);
        assert_eq!(st.z, 1.5);
        assert_eq!(st.p, 89.0);
        assert_eq!(st.hp, MAX_HP);
        assert_eq!(st.color, "#00ff00");
    }

    #[tokio::test]
    async fn garbage_lines_do_not_end_the_session() {
        let reg = Arc::new(Registry::new());
        let mut conn = handshake(&reg, "alice").await;
        conn.send("{this is not json\n").await;
        conn.send("{\"type\":\"dance\"}\n\n").await;
        conn.send("{\"type\":\"pos\",\"payload\":{\"x\":7}}\n").await;
        settle(&reg, "alice", |st| st.as_ref().is_some_and(|s| s.x == 7.0)).await;
        assert!(!conn.task.is_finished());
    }

    #[tokio::test]
    async fn split_writes_are_reassembled() {
        let reg = Arc::new(Registry::new());
        let mut conn = handshake(&reg, "alice").await;
        for part in ["{\"type\":\"po", "s\",\"payload\":{\"x\":", "2}}\n{\"type\":\"pos\",\"payload\":{\"y\":4}}\n"] {
            conn.send(part).await;
            tokio::task::yield_now().await;
        }
        settle(&reg, "alice", |st| {
            st.as_ref().is_some_and(|s| s.x == 2.0 && s.y == 4.0)
        })
        .await;
    }

    #[tokio::test]
    async fn disconnect_removes_entry() {
        let reg = Arc::new(Registry::new());
        let mut conn = handshake(&reg, "alice").await;
        let _other = handshake(&reg, "bob").await;
        conn.to_server.shutdown().await.unwrap();
        let end = conn.task.await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::PeerClosed);
        assert!(!reg.contains("alice").await);
        assert!(reg.contains("bob").await);
    }

    #[tokio::test]
    async fn bye_ends_session() {
        let reg = Arc::new(Registry::new());
        let mut conn = handshake(&reg, "alice").await;
        conn.send("{\"type\":\"bye\"}\n").await;
        assert_eq!(conn.task.await.unwrap().unwrap(), SessionEnd::Bye);
        assert!(reg.is_empty().await);
    }

    #[tokio::test]
    async fn shoot_damages_other_player() {
        let reg = Arc::new(Registry::new());
        let mut a = handshake(&reg, "a").await;
        let _b = handshake(&reg, "b").await;
        a.send("{\"type\":\"shoot\",\"target\":\"b\"}\n").await;
        settle(&reg, "b", |st| {
            st.as_ref().is_some_and(|s| s.hp == MAX_HP - SHOT_DAMAGE)
        })
        .await;
        assert_eq!(reg.get("a").await.unwrap().hp, MAX_HP);
    }

    #[tokio::test]
    async fn reconnect_closes_old_session_and_keeps_new_entry() {
        let reg = Arc::new(Registry::new());
        let old = handshake(&reg, "alice").await;
        let mut new = handshake(&reg, "alice").await;

        let end = time::timeout(Duration::from_secs(1), old.task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(end, SessionEnd::Closed);
        assert!(reg.contains("alice").await);

        new.send("{\"type\":\"pos\",\"payload\":{\"x\":5}}\n").await;
        settle(&reg, "alice", |st| st.as_ref().is_some_and(|s| s.x == 5.0)).await;
    }

    #[tokio::test]
    async fn failed_map_write_keeps_session() {
        let reg = Arc::new(Registry::new());
        let (mut to_server, srv_rd) = tokio::io::duplex(4096);
        let (gone, srv_wr) = tokio::io::duplex(64);
        drop(gone);
        let task = tokio::spawn(handle_connection(context(&reg), srv_rd, srv_wr, None));

        to_server
            .write_all(b"alice\n{\"type\":\"pos\",\"payload\":{\"x\":7}}\n")
            .await
            .unwrap();
        settle(&reg, "alice", |st| st.as_ref().is_some_and(|s| s.x == 7.0)).await;
        assert!(!task.is_finished());

        to_server.shutdown().await.unwrap();
        assert_eq!(task.await.unwrap().unwrap(), SessionEnd::PeerClosed);
        assert!(reg.is_empty().await);
    }

    #[tokio::test]
    async fn stalled_map_write_ends_session() {
        let reg = Arc::new(Registry::new());
        let ctx = SessionContext {
            write_timeout: Duration::from_millis(100),
            ..context(&reg)
        };
        let (mut to_server, srv_rd) = tokio::io::duplex(4096);
        // Too small for the map line and never drained.
        let (_unread, srv_wr) = tokio::io::duplex(16);
        let task = tokio::spawn(handle_connection(ctx, srv_rd, srv_wr, None));

        to_server.write_all(b"alice\n").await.unwrap();
        let res = time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert!(res.is_err());
        assert!(reg.is_empty().await);
    }

    #[tokio::test]
    async fn idle_session_hits_read_timeout() {
        let reg = Arc::new(Registry::new());
        let ctx = SessionContext {
            read_timeout: Some(Duration::from_millis(100)),
            ..context(&reg)
        };
        let mut conn = connect_with(ctx);
        conn.send("alice\n").await;
        assert!(matches!(conn.recv().await, NetMsg::Map { .. }));
        assert!(reg.contains("alice").await);

        let res = time::timeout(Duration::from_secs(2), conn.task)
            .await
            .unwrap()
            .unwrap();
        assert!(res.is_err());
        assert!(reg.is_empty().await);
    }

    #[tokio::test]
    async fn kick_terminates_handler() {
        let reg = Arc::new(Registry::new());
        let conn = handshake(&reg, "alice").await;
        assert!(reg.kick("alice").await);
        let end = time::timeout(Duration::from_secs(1), conn.task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(end, SessionEnd::Closed);
    }
}
