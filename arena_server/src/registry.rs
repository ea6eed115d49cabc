//! Session registry.
//!
//! Maps each live identity to its connection sink and [`PlayerState`]. One
//! mutex guards the whole table: handlers write through it, the broadcaster
//! copies out of it, so a snapshot never sees a half-applied update.
//!
//! Every registration gets a fresh [`SessionId`]. Mutations carry the caller's
//! id and are refused once a reconnect with the same identity has taken the
//! entry over, which keeps each entry single-writer.

use std::{
    collections::{BTreeMap, HashMap},
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use arena_shared::{
    net::LineSink,
    state::{PlayerState, PosUpdate},
};
use tokio::sync::{Mutex, Notify};
use tracing::debug;

/// Write side of a connection, shared between its handler and the broadcaster.
pub type SharedSink = Arc<Mutex<Box<dyn LineSink>>>;

pub fn shared_sink(sink: impl LineSink + 'static) -> SharedSink {
    Arc::new(Mutex::new(Box::new(sink)))
}

/// Identifies one registration of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

struct Entry {
    session: SessionId,
    sink: SharedSink,
    closer: Arc<Notify>,
    peer: Option<SocketAddr>,
    updated_at: Instant,
    state: PlayerState,
}

/// Handed back to a handler after its identity is registered.
#[derive(Debug, Clone)]
pub struct Registration {
    pub session: SessionId,
    /// Notified when the registry wants this session gone.
    pub closer: Arc<Notify>,
    /// True if a previous session with the same identity was displaced.
    pub replaced: bool,
}

/// Result of a `shoot` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotOutcome {
    Hit { hp: u8 },
    Killed,
    NoTarget,
    TargetDead,
    SelfTarget,
    /// The shooter's session no longer owns its identity.
    Stale,
}

/// One connection the broadcaster should write to.
pub struct BroadcastTarget {
    pub identity: String,
    pub session: SessionId,
    pub sink: SharedSink,
}

/// Point-in-time copy of the registry taken under the lock.
pub struct BroadcastSet {
    pub players: BTreeMap<String, PlayerState>,
    pub targets: Vec<BroadcastTarget>,
}

/// Diagnostic view of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub identity: String,
    pub session: SessionId,
    pub peer: Option<SocketAddr>,
    pub state: PlayerState,
    pub since_update: Duration,
}

/// Shared identity -> session table.
#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<String, Entry>>,
    next_session: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `identity` with the spawn state. An existing session under
    /// the same identity is displaced and told to close.
    pub async fn register(
        &self,
        identity: &str,
        sink: SharedSink,
        peer: Option<SocketAddr>,
    ) -> Registration {
        let session = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed) + 1);
        let closer = Arc::new(Notify::new());
        let entry = Entry {
            session,
            sink,
            closer: Arc::clone(&closer),
            peer,
            updated_at: Instant::now(),
            state: PlayerState::default(),
        };

        let old = self.entries.lock().await.insert(identity.to_string(), entry);
        let replaced = match old {
            Some(old) => {
                debug!(identity = %identity, old = ?old.session, new = ?session, "Identity taken over");
                old.closer.notify_one();
                true
            }
            None => false,
        };

        Registration {
            session,
            closer,
            replaced,
        }
    }

    /// Applies a position update to the caller's own entry.
    ///
    /// Returns the new state, or `None` if `session` no longer owns `identity`.
    pub async fn update(
        &self,
        identity: &str,
        session: SessionId,
        upd: &PosUpdate,
    ) -> Option<PlayerState> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(identity).filter(|e| e.session == session)?;
        entry.state.apply(upd);
        entry.updated_at = Instant::now();
        Some(entry.state.clone())
    }

    /// Applies `damage` to `target` on behalf of `shooter`.
    pub async fn shoot(
        &self,
        shooter: &str,
        session: SessionId,
        target: &str,
        damage: u8,
    ) -> ShotOutcome {
        let mut entries = self.entries.lock().await;
        if !entries.get(shooter).is_some_and(|e| e.session == session) {
            return ShotOutcome::Stale;
        }
        if shooter == target {
            return ShotOutcome::SelfTarget;
        }
        let Some(victim) = entries.get_mut(target) else {
            return ShotOutcome::NoTarget;
        };
        if !victim.state.is_alive() {
            return ShotOutcome::TargetDead;
        }
        victim.updated_at = Instant::now();
        if victim.state.take_damage(damage) {
            ShotOutcome::Killed
        } else {
            ShotOutcome::Hit {
                hp: victim.state.hp,
            }
        }
    }

    /// Removes `identity` if it still belongs to `session`.
    pub async fn remove(&self, identity: &str, session: SessionId) -> bool {
        let mut entries = self.entries.lock().await;
        if entries.get(identity).is_some_and(|e| e.session == session) {
            entries.remove(identity);
            true
        } else {
            false
        }
    }

    /// Removes `identity` regardless of session and signals its handler.
    pub async fn kick(&self, identity: &str) -> bool {
        match self.entries.lock().await.remove(identity) {
            Some(entry) => {
                entry.closer.notify_one();
                true
            }
            None => false,
        }
    }

    /// Copies every player state and connection sink in one critical section.
    pub async fn collect_broadcast(&self) -> BroadcastSet {
        let entries = self.entries.lock().await;
        let mut players = BTreeMap::new();
        let mut targets = Vec::with_capacity(entries.len());
        for (identity, entry) in entries.iter() {
            players.insert(identity.clone(), entry.state.clone());
            targets.push(BroadcastTarget {
                identity: identity.clone(),
                session: entry.session,
                sink: Arc::clone(&entry.sink),
            });
        }
        BroadcastSet { players, targets }
    }

    /// Removes sessions whose writes failed and signals their handlers.
    /// Entries re-registered since the broadcast are left alone.
    pub async fn drop_dead(&self, dead: &[(String, SessionId)]) -> usize {
        let mut entries = self.entries.lock().await;
        let mut removed = 0;
        for (identity, session) in dead {
            if entries.get(identity).is_some_and(|e| e.session == *session) {
                if let Some(entry) = entries.remove(identity) {
                    entry.closer.notify_one();
                    removed += 1;
                }
            }
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn contains(&self, identity: &str) -> bool {
        self.entries.lock().await.contains_key(identity)
    }

    pub async fn get(&self, identity: &str) -> Option<PlayerState> {
        self.entries
            .lock()
            .await
            .get(identity)
            .map(|e| e.state.clone())
    }

    pub async fn players(&self) -> BTreeMap<String, PlayerState> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|(k, e)| (k.clone(), e.state.clone()))
            .collect()
    }

    /// Sessions sorted by identity.
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        let entries = self.entries.lock().await;
        let mut out: Vec<SessionInfo> = entries
            .iter()
            .map(|(k, e)| SessionInfo {
                identity: k.clone(),
                session: e.session,
                peer: e.peer,
                state: e.state.clone(),
                since_update: e.updated_at.elapsed(),
            })
            .collect();
        out.sort_by(|a, b| a.identity.cmp(&b.identity));
        out
    }
}
