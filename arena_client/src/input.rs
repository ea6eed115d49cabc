//! Input handling.
//!
//! Turns sampled movement/rotation input into changes of the local
//! [`PlayerState`]. Movement is planar and relative to the current heading;
//! pitch never leaves the replicated range.

use arena_shared::state::{clamp_pitch, PlayerState};

/// Ground speed in units per second.
pub const MOVE_SPEED: f64 = 3.5;
/// Rotation speed in degrees per second at full input.
pub const ROT_SPEED: f64 = 90.0;

/// User input state at a moment in time. Axes are in `[-1, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputState {
    pub forward: f64,
    pub right: f64,
    /// Positive turns left.
    pub yaw: f64,
    /// Positive looks up.
    pub pitch: f64,
}

/// Advances `st` by `dt` seconds of `input`.
pub fn integrate(st: &mut PlayerState, input: InputState, dt: f64) {
    st.h += input.yaw.clamp(-1.0, 1.0) * ROT_SPEED * dt;
    st.p = clamp_pitch(st.p + input.pitch.clamp(-1.0, 1.0) * ROT_SPEED * dt);

    let (mut f, mut r) = (input.forward, input.right);
    let len = f.hypot(r);
    if len > 0.0 {
        f /= len;
        r /= len;
        step(st, f * MOVE_SPEED * dt, r * MOVE_SPEED * dt);
    }
}

/// Moves `forward`/`right` units relative to the current heading.
///
/// Heading 0 faces +y; positive heading turns counter-clockwise.
pub fn step(st: &mut PlayerState, forward: f64, right: f64) {
    let (sin, cos) = st.h.to_radians().sin_cos();
    st.x += -sin * forward + cos * right;
    st.y += cos * forward + sin * right;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn origin() -> PlayerState {
        PlayerState {
            x: 0.0,
            y: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn forward_at_zero_heading_moves_along_y() {
        let mut st = origin();
        integrate(
            &mut st,
            InputState {
                forward: 1.0,
                ..Default::default()
            },
            1.0,
        );
        assert!(close(st.x, 0.0));
        assert!(close(st.y, MOVE_SPEED));
    }

    #[test]
    fn diagonal_input_is_normalized() {
        let mut st = origin();
        integrate(
            &mut st,
            InputState {
                forward: 1.0,
                right: 1.0,
                ..Default::default()
            },
            1.0,
        );
        assert!(close(st.x.hypot(st.y), MOVE_SPEED));
    }

    #[test]
    fn step_follows_heading() {
        let mut st = origin();
        st.h = 90.0;
        step(&mut st, 2.0, 0.0);
        assert!(close(st.x, -2.0));
        assert!(close(st.y, 0.0));
    }

    #[test]
    fn pitch_is_clamped() {
        let mut st = origin();
        integrate(
            &mut st,
            InputState {
                pitch: 1.0,
                yaw: -0.5,
                ..Default::default()
            },
            5.0,
        );
        assert_eq!(st.p, 89.0);
        assert!(close(st.h, -225.0));
    }
}
