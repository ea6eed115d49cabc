//! Player state as replicated to every client.
//!
//! The server owns one [`PlayerState`] per live identity. Writes go through
//! [`PlayerState::apply`] and [`PlayerState::take_damage`] so the health and
//! pitch ranges hold after any sequence of updates.

use serde::{Deserialize, Serialize};

pub const MAX_HP: u8 = 100;
pub const PITCH_LIMIT: f64 = 89.0;
/// Health removed by one successful shot.
pub const SHOT_DAMAGE: u8 = 25;
pub const DEFAULT_COLOR: &str = "#ff0000";

/// Replicated state of a single player.
///
/// Serializes to exactly `{x,y,z,h,p,color,hp}`; liveness is derived from `hp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerState {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Yaw in degrees.
    pub h: f64,
    /// Pitch in degrees, within `[-PITCH_LIMIT, PITCH_LIMIT]`.
    pub p: f64,
    pub color: String,
    pub hp: u8,
}

impl Default for PlayerState {
    /// Spawn state for a freshly registered identity.
    fn default() -> Self {
        Self {
            x: 1.0,
            y: 1.0,
            z: 1.5,
            h: 0.0,
            p: 0.0,
            color: DEFAULT_COLOR.to_string(),
            hp: MAX_HP,
        }
    }
}

impl PlayerState {
    pub fn is_alive(&self) -> bool {
        self.hp > 0
    }

    /// Applies a partial update; absent fields keep their previous value.
    pub fn apply(&mut self, upd: &PosUpdate) {
        self.x = upd.x.unwrap_or(self.x);
        self.y = upd.y.unwrap_or(self.y);
        self.z = upd.z.unwrap_or(self.z);
        self.h = upd.h.unwrap_or(self.h);
        if let Some(p) = upd.p {
            self.p = clamp_pitch(p);
        }
        if let Some(color) = &upd.color {
            self.color.clone_from(color);
        }
        if let Some(hp) = upd.hp {
            self.hp = clamp_hp(hp);
        }
    }

    /// Removes `amount` health, saturating at zero. Returns true if this
    /// shot took the player from alive to dead.
    pub fn take_damage(&mut self, amount: u8) -> bool {
        let was_alive = self.is_alive();
        self.hp = self.hp.saturating_sub(amount);
        was_alive && !self.is_alive()
    }
}

/// A client position update after lenient field extraction.
///
/// `None` means the field was absent or malformed on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PosUpdate {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub h: Option<f64>,
    pub p: Option<f64>,
    pub color: Option<String>,
    pub hp: Option<i64>,
}

pub fn clamp_hp(hp: i64) -> u8 {
    hp.clamp(0, i64::from(MAX_HP)) as u8
}

pub fn clamp_pitch(p: f64) -> f64 {
    p.clamp(-PITCH_LIMIT, PITCH_LIMIT)
}
