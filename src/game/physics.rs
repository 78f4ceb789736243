//! Acceleration-based movement integration

use super::input::InputFrame;
use super::role::RoleStats;

/// Velocity magnitude below which components snap to exactly zero
pub const MIN_VELOCITY: f32 = 0.01;

/// Speed threshold for updating the facing angle; prevents idle jitter
/// in the facing direction
pub const FACING_THRESHOLD: f32 = 10.0;

pub fn speed(vx: f32, vy: f32) -> f32 {
    (vx * vx + vy * vy).sqrt()
}

/// Integrate one fixed step of input-driven movement for an entity.
///
/// Acceleration from held directions (diagonals normalized by 1/sqrt 2),
/// exponential per-second drag, sub-threshold snap to zero, speed clamp,
/// then position integration.
pub fn apply_movement(
    x: &mut f32,
    y: &mut f32,
    vx: &mut f32,
    vy: &mut f32,
    input: &InputFrame,
    dt: f32,
    stats: &RoleStats,
) {
    let mut ax = 0.0f32;
    let mut ay = 0.0f32;
    if input.left {
        ax -= stats.acceleration;
    }
    if input.right {
        ax += stats.acceleration;
    }
    if input.up {
        ay -= stats.acceleration;
    }
    if input.down {
        ay += stats.acceleration;
    }

    // Diagonal normalization: two perpendicular directions held
    if ax != 0.0 && ay != 0.0 {
        let n = std::f32::consts::FRAC_1_SQRT_2;
        ax *= n;
        ay *= n;
    }

    *vx += ax * dt;
    *vy += ay * dt;

    // Exponential damping per second
    let damp = stats.drag.powf(dt);
    *vx *= damp;
    *vy *= damp;

    if vx.abs() < MIN_VELOCITY {
        *vx = 0.0;
    }
    if vy.abs() < MIN_VELOCITY {
        *vy = 0.0;
    }

    let current = speed(*vx, *vy);
    if current > stats.max_velocity {
        let scale = stats.max_velocity / current;
        *vx *= scale;
        *vy *= scale;
    }

    *x += *vx * dt;
    *y += *vy * dt;
}

/// Facing angle follows velocity, but only above the jitter threshold
pub fn update_facing(angle: &mut f32, vx: f32, vy: f32) {
    if speed(vx, vy) > FACING_THRESHOLD {
        *angle = vy.atan2(vx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::Role;

    const DT: f32 = 1.0 / 60.0;

    fn held(left: bool, right: bool, up: bool, down: bool) -> InputFrame {
        InputFrame { seq: 0, left, right, up, down, fire: false }
    }

    #[test]
    fn accelerates_in_input_direction() {
        let stats = RoleStats::for_role(Role::Faran);
        let (mut x, mut y, mut vx, mut vy) = (100.0, 100.0, 0.0, 0.0);
        apply_movement(&mut x, &mut y, &mut vx, &mut vy, &held(false, true, false, false), DT, &stats);
        assert!(vx > 0.0);
        assert_eq!(vy, 0.0);
        assert!(x > 100.0);
    }

    #[test]
    fn diagonal_input_is_normalized() {
        let stats = RoleStats::for_role(Role::Paran);
        let (mut x, mut y, mut vx, mut vy) = (0.0, 0.0, 0.0, 0.0);
        apply_movement(&mut x, &mut y, &mut vx, &mut vy, &held(false, true, false, true), DT, &stats);
        // Both components get acceleration / sqrt(2)
        assert!((vx - vy).abs() < 1e-4);
        let (mut x2, mut y2, mut vx2, mut vy2) = (0.0, 0.0, 0.0, 0.0);
        apply_movement(&mut x2, &mut y2, &mut vx2, &mut vy2, &held(false, true, false, false), DT, &stats);
        assert!(vx < vx2);
    }

    #[test]
    fn speed_is_clamped_to_role_max() {
        let stats = RoleStats::for_role(Role::Faran);
        let (mut x, mut y, mut vx, mut vy) = (0.0, 0.0, 0.0, 0.0);
        for _ in 0..120 {
            apply_movement(&mut x, &mut y, &mut vx, &mut vy, &held(false, true, false, false), DT, &stats);
        }
        assert!(speed(vx, vy) <= stats.max_velocity + 1e-3);
        assert!((vx - stats.max_velocity).abs() < 1.0);
    }

    #[test]
    fn drag_decays_velocity_to_exact_zero() {
        let stats = RoleStats::for_role(Role::Faran);
        let (mut x, mut y, mut vx, mut vy) = (0.0, 0.0, stats.max_velocity, 0.0);
        let idle = InputFrame::default();
        for _ in 0..180 {
            apply_movement(&mut x, &mut y, &mut vx, &mut vy, &idle, DT, &stats);
        }
        // Snap-to-zero, not just small
        assert_eq!(vx, 0.0);
        assert_eq!(vy, 0.0);
    }

    #[test]
    fn facing_holds_below_threshold() {
        let mut angle = 1.0;
        update_facing(&mut angle, 3.0, 3.0); // speed ~4.2 < 10
        assert_eq!(angle, 1.0);
        update_facing(&mut angle, 50.0, 0.0);
        assert_eq!(angle, 0.0);
    }

    #[test]
    fn identical_input_sequences_are_deterministic() {
        let stats = RoleStats::for_role(Role::Paran);
        let script = [
            held(false, true, false, false),
            held(false, true, false, true),
            held(true, false, true, false),
            InputFrame::default(),
        ];
        let run = || {
            let (mut x, mut y, mut vx, mut vy) = (100.0, 100.0, 0.0, 0.0);
            for _ in 0..50 {
                for frame in &script {
                    apply_movement(&mut x, &mut y, &mut vx, &mut vy, frame, DT, &stats);
                }
            }
            (x.to_bits(), y.to_bits(), vx.to_bits(), vy.to_bits())
        };
        assert_eq!(run(), run());
    }
}
