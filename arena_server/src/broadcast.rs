//! Snapshot broadcaster.
//!
//! Once per tick the whole registry is copied under its lock, encoded as one
//! `state` line and written to every connection concurrently. Each write has
//! its own deadline, so a stalled peer costs the tick at most
//! `write_timeout`. Connections whose write failed are removed after the pass.

use std::{sync::Arc, time::Duration};

use arena_shared::{
    config::ArenaConfig,
    net::{encode_line, unix_time_secs, NetMsg},
};
use tokio::{
    task::JoinSet,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::registry::{Registry, SessionId};

/// Outcome of one broadcast pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Players contained in the snapshot.
    pub players: usize,
    /// Connections that accepted the snapshot.
    pub delivered: usize,
    /// Identities removed because their write failed or timed out.
    pub dropped: Vec<String>,
}

pub struct Broadcaster {
    registry: Arc<Registry>,
    interval: Duration,
    write_timeout: Duration,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>, cfg: &ArenaConfig) -> Self {
        Self::with_timing(registry, cfg.tick_interval(), cfg.write_timeout())
    }

    pub fn with_timing(registry: Arc<Registry>, interval: Duration, write_timeout: Duration) -> Self {
        Self {
            registry,
            interval,
            write_timeout,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ticks forever. The first snapshot goes out one interval after start.
    pub async fn run(self) {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.tick().await {
                Ok(report) if !report.dropped.is_empty() => {
                    info!(dropped = ?report.dropped, "Removed unreachable players");
                }
                Ok(report) => {
                    debug!(players = report.players, delivered = report.delivered, "Snapshot sent");
                }
                Err(e) => warn!(error = %e, "Broadcast tick failed"),
            }
        }
    }

    /// Executes one broadcast pass.
    pub async fn tick(&self) -> anyhow::Result<TickReport> {
        let set = self.registry.collect_broadcast().await;
        let mut report = TickReport {
            players: set.players.len(),
            ..Default::default()
        };
        if set.targets.is_empty() {
            return Ok(report);
        }

        let line = encode_line(&NetMsg::state(set.players, unix_time_secs()))?;

        let mut writes = JoinSet::new();
        for target in set.targets {
            let line = line.clone();
            let limit = self.write_timeout;
            writes.spawn(async move {
                let res = time::timeout(limit, async {
                    target.sink.lock().await.send_line(&line).await
                })
                .await;
                let failure = match res {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => Some(format!("write timed out after {limit:?}")),
                };
                (target.identity, target.session, failure)
            });
        }

        let mut dead: Vec<(String, SessionId)> = Vec::new();
        while let Some(joined) = writes.join_next().await {
            match joined {
                Ok((_, _, None)) => report.delivered += 1,
                Ok((identity, session, Some(reason))) => {
                    debug!(identity = %identity, reason = %reason, "Snapshot write failed");
                    dead.push((identity, session));
                }
                Err(e) => warn!(error = %e, "Snapshot write task failed"),
            }
        }

        if !dead.is_empty() {
            self.registry.drop_dead(&dead).await;
            report.dropped = dead.into_iter().map(|(identity, _)| identity).collect();
            report.dropped.sort();
        }
        Ok(report)
    }
}
