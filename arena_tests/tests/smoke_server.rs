use std::time::Duration;

use arena_server::{broadcast::TickReport, server::bind_ephemeral};
use arena_shared::{map::WorldMap, net::NetMsg};
use arena_tests::RawPeer;

/// Smoke test: a broadcast pass over an empty server is a no-op.
#[tokio::test]
async fn empty_server_ticks() -> anyhow::Result<()> {
    let (server, _cfg) = bind_ephemeral(Duration::from_millis(50)).await?;
    let broadcaster = server.broadcaster();
    for _ in 0..3 {
        assert_eq!(broadcaster.tick().await?, TickReport::default());
    }
    Ok(())
}

/// Smoke test: a single accepted connection is registered and gets the map.
#[tokio::test]
async fn accept_one_registers_player() -> anyhow::Result<()> {
    let (server, cfg) = bind_ephemeral(Duration::from_millis(50)).await?;

    let connect = tokio::spawn(async move {
        let mut peer = RawPeer::connect(&cfg.server_addr).await?;
        peer.send_raw("solo\n").await?;
        let first = peer.recv(Duration::from_secs(2)).await?;
        Ok::<_, anyhow::Error>((peer, first))
    });

    server.accept_one().await?;
    let (_peer, first) = connect.await??;
    assert_eq!(first, Some(NetMsg::map(WorldMap::default().rows)));
    assert!(server.registry().contains("solo").await);

    let report = server.broadcaster().tick().await?;
    assert_eq!(report.players, 1);
    assert_eq!(report.delivered, 1);
    Ok(())
}
