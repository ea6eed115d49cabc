//! Full socket-based integration tests for client <-> server communication.

use std::time::Duration;

use arena_client::{client::ClientState, input::InputState, GameClient};
use arena_shared::{
    map::WorldMap,
    net::NetMsg,
    state::{PlayerState, MAX_HP, SHOT_DAMAGE},
};
use arena_tests::{init_tracing, RawPeer, TestServer};

const TICK: Duration = Duration::from_millis(100);
/// Generous bound for "within one tick" on a loaded CI machine.
const WAIT: Duration = Duration::from_secs(3);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn position_update_reaches_every_client() -> anyhow::Result<()> {
    init_tracing();
    let srv = TestServer::start(TICK).await?;

    let mut alice = RawPeer::join(srv.addr(), "alice").await?;
    let mut bob = RawPeer::join(srv.addr(), "bob").await?;

    alice
        .send_raw(
            "{\"type\":\"pos\",\"payload\":{\"x\":1,\"y\":2,\"z\":1.5,\"h\":0,\"p\":0,\"color\":\"#ff0000\",\"hp\":100}}\n",
        )
        .await?;

    let expected = PlayerState {
        x: 1.0,
        y: 2.0,
        z: 1.5,
        h: 0.0,
        p: 0.0,
        color: "#ff0000".to_string(),
        hp: 100,
    };
    for peer in [&mut alice, &mut bob] {
        let snap = peer
            .state_where(WAIT, |s| s.players.get("alice") == Some(&expected))
            .await?;
        // The receiver's own entry is included too.
        assert!(snap.players.contains_key("alice"));
        assert!(snap.players.contains_key("bob"));
        assert_eq!(snap.players["bob"], PlayerState::default());
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shots_reduce_health_down_to_zero() -> anyhow::Result<()> {
    init_tracing();
    let srv = TestServer::start(TICK).await?;

    let mut a = RawPeer::join(srv.addr(), "a").await?;
    let _b = RawPeer::join(srv.addr(), "b").await?;

    a.send(&NetMsg::Shoot {
        target: "b".to_string(),
    })
    .await?;
    let snap = a
        .state_where(WAIT, |s| {
            s.players.get("b").map(|p| p.hp) == Some(MAX_HP - SHOT_DAMAGE)
        })
        .await?;
    assert!(snap.players["b"].is_alive());
    assert_eq!(snap.players["a"].hp, MAX_HP);

    // Keep firing past zero.
    for _ in 0..6 {
        a.send(&NetMsg::Shoot {
            target: "b".to_string(),
        })
        .await?;
    }
    let snap = a
        .state_where(WAIT, |s| s.players.get("b").map(|p| p.hp) == Some(0))
        .await?;
    assert!(!snap.players["b"].is_alive());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnected_player_leaves_next_snapshot() -> anyhow::Result<()> {
    init_tracing();
    let srv = TestServer::start(TICK).await?;

    let mut a = RawPeer::join(srv.addr(), "a").await?;
    let b = RawPeer::join(srv.addr(), "b").await?;
    a.state_where(WAIT, |s| s.players.contains_key("b")).await?;

    b.close().await?;
    let snap = a
        .state_where(WAIT, |s| !s.players.contains_key("b"))
        .await?;
    assert_eq!(snap.players.get("a"), Some(&PlayerState::default()));
    assert!(!srv.server.registry().contains("b").await);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_lines_are_skipped() -> anyhow::Result<()> {
    init_tracing();
    let srv = TestServer::start(TICK).await?;

    let mut a = RawPeer::join(srv.addr(), "a").await?;
    a.send_raw("{\"type\":\"pos\",\"payload\":{\"x\":\n").await?;
    a.send_raw("not json at all\n").await?;
    a.send_raw("{\"type\":\"warp\",\"payload\":{}}\n").await?;
    a.send_raw("{\"type\":\"pos\",\"payload\":{\"x\":42,\"hp\":-5}}\n")
        .await?;

    let snap = a
        .state_where(WAIT, |s| s.players.get("a").map(|p| p.x) == Some(42.0))
        .await?;
    assert_eq!(snap.players["a"].hp, 0);
    assert_eq!(snap.players["a"].y, 1.0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnect_replaces_previous_session() -> anyhow::Result<()> {
    init_tracing();
    let srv = TestServer::start(TICK).await?;

    let mut first = RawPeer::join(srv.addr(), "alice").await?;
    first
        .send_raw("{\"type\":\"pos\",\"payload\":{\"x\":9}}\n")
        .await?;
    first
        .state_where(WAIT, |s| s.players.get("alice").map(|p| p.x) == Some(9.0))
        .await?;

    let mut second = RawPeer::join(srv.addr(), "alice").await?;

    // The displaced connection is closed by the server.
    while first.recv(WAIT).await?.is_some() {}

    let snap = second
        .state_where(WAIT, |s| s.players.contains_key("alice"))
        .await?;
    assert_eq!(snap.players.len(), 1);
    assert_eq!(snap.players["alice"], PlayerState::default());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn game_client_full_roundtrip() -> anyhow::Result<()> {
    init_tracing();
    let srv = TestServer::start(TICK).await?;

    let mut cfg = srv.client_config("TestPlayer");
    cfg.player_color = "#00ff00".to_string();
    let mut client = GameClient::connect(&cfg).await?;

    client.local.x = 3.0;
    client.local.y = -2.0;
    client.input.forward = 1.0;
    client.advance(1.0);
    client.input = InputState::default();
    client.advance(1.0);
    client.send_position().await?;

    let mut seen = None;
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if let Some(snap) = client.wait_snapshot(WAIT).await? {
            if snap.players.get("TestPlayer").map(|p| p.x) == Some(3.0) {
                seen = Some(snap);
                break;
            }
        }
    }
    let snap = seen.expect("own update replicated");

    assert_eq!(client.state, ClientState::Ready);
    assert_eq!(client.map.as_deref(), Some(WorldMap::default().rows.as_slice()));
    let me = &snap.players["TestPlayer"];
    assert_eq!(me.y, 1.5);
    assert_eq!(me.color, "#00ff00");
    assert_eq!(client.rgba, [0.0, 1.0, 0.0, 1.0]);
    assert_eq!(client.own_state().map(|p| p.hp), Some(MAX_HP));

    assert!(client.wait_snapshot(WAIT).await?.is_some());
    let (x, y, _) = client
        .smoothed_position("TestPlayer")
        .expect("two snapshots buffered");
    assert_eq!((x, y), (3.0, 1.5));

    client.disconnect().await?;
    assert_eq!(client.state, ClientState::Disconnected);
    Ok(())
}
