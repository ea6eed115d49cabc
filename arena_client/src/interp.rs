//! Interpolation.
//!
//! The server sends discrete snapshots once per tick, far below a render
//! rate. The client keeps a short history and interpolates player positions.

use std::collections::VecDeque;

use arena_shared::{net::StatePayload, state::PlayerState};

/// Buffered snapshot history for interpolation.
#[derive(Debug, Default)]
pub struct SnapshotBuffer {
    history: VecDeque<StatePayload>,
    max: usize,
}

impl SnapshotBuffer {
    pub fn new(max: usize) -> Self {
        Self {
            history: VecDeque::new(),
            max: max.max(1),
        }
    }

    pub fn push(&mut self, snap: StatePayload) {
        self.history.push_back(snap);
        while self.history.len() > self.max {
            self.history.pop_front();
        }
    }

    /// Returns the number of buffered snapshots.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Returns true if no snapshots are buffered.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Interpolated `(x, y, z)` for a player between the two newest snapshots.
    ///
    /// `alpha` is clamped to `[0,1]` where 0 = older snapshot, 1 = newer.
    pub fn interp_player(&self, identity: &str, alpha: f64) -> Option<(f64, f64, f64)> {
        let n = self.history.len();
        if n < 2 {
            return None;
        }
        let a = self.history[n - 2].players.get(identity)?;
        let b = self.history[n - 1].players.get(identity)?;
        let t = alpha.clamp(0.0, 1.0);
        let lerp = |from: f64, to: f64| from + (to - from) * t;
        Some((lerp(a.x, b.x), lerp(a.y, b.y), lerp(a.z, b.z)))
    }

    /// Seconds of server time between the two newest snapshots.
    pub fn spacing(&self) -> Option<f64> {
        let n = self.history.len();
        if n < 2 {
            return None;
        }
        Some(self.history[n - 1].t - self.history[n - 2].t)
    }

    pub fn last_snapshot(&self) -> Option<&StatePayload> {
        self.history.back()
    }

    /// Latest replicated state of one player.
    pub fn latest(&self, identity: &str) -> Option<&PlayerState> {
        self.last_snapshot()?.players.get(identity)
    }
}
