//! Per-role stat tables and combat constants

use crate::ws::protocol::Role;

/// Stats for one role. Role behavior differences elsewhere in the
/// simulation (velocity wipe, obstacle smashing, contact kills) branch
/// on the `Role` tag itself; everything tunable lives here.
#[derive(Debug, Clone, Copy)]
pub struct RoleStats {
    /// Maximum (and spawn) health
    pub max_health: f32,
    /// Acceleration applied per held input direction (px/s^2)
    pub acceleration: f32,
    /// Exponential damping factor per second (v *= drag^dt)
    pub drag: f32,
    /// Speed cap (px/s)
    pub max_velocity: f32,
    /// Damage per projectile hit
    pub damage: f32,
    /// Cooldown between shots (ms of server time)
    pub fire_rate: f64,
    /// Projectile launch speed (px/s)
    pub projectile_speed: f32,
}

impl RoleStats {
    pub fn for_role(role: Role) -> Self {
        match role {
            // Solo hunter: tanky and fast, but drifts and pays for wall
            // hits with a full velocity wipe (resolved in collision).
            Role::Paran => Self {
                max_health: 150.0,
                acceleration: 600.0,
                drag: 0.95,
                max_velocity: 400.0,
                damage: 40.0,
                fire_rate: 1000.0,
                projectile_speed: 400.0,
            },
            // Guardians: fragile, nimble, rapid fire. Near-zero drag
            // factor stops them within a few ticks of releasing input.
            Role::Faran | Role::Baran => Self {
                max_health: 50.0,
                acceleration: 3000.0,
                drag: 1e-6,
                max_velocity: 110.0,
                damage: 10.0,
                fire_rate: 200.0,
                projectile_speed: 400.0,
            },
        }
    }
}

/// Combat constants shared by all roles
pub mod combat {
    /// Player hitbox radius (AABB half-extent for tile collision,
    /// circle radius for projectile/contact checks)
    pub const PLAYER_RADIUS: f32 = 12.0;
    /// Projectile hitbox radius
    pub const PROJECTILE_RADIUS: f32 = 4.0;
    /// Projectile lifetime (ms of server time)
    pub const PROJECTILE_LIFETIME: f64 = 2000.0;
    /// Contact kill range: paran overlapping a guardian
    pub const CONTACT_KILL_RANGE: f32 = 2.0 * PLAYER_RADIUS;
}
