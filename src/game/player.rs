//! Player state, stats, and spawn placement

use uuid::Uuid;

use super::grid::CollisionGrid;
use super::input::InputQueue;
use super::map::SpawnPoint;
use super::role::{combat, RoleStats};
use crate::ws::protocol::Role;

/// Authoritative per-player state. One slot per role; created on join
/// and mutated in place for the whole match (stage transitions reset
/// fields, never recreate the object).
#[derive(Debug, Clone)]
pub struct Player {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    /// Facing direction in radians
    pub angle: f32,
    pub health: f32,
    pub connected: bool,
    /// Server time of the last shot (ms); cooldown gate
    pub last_fire_time: f64,
    /// Last processed input sequence, for client reconciliation
    pub last_processed_seq: u32,
    pub input_queue: InputQueue,
    /// Reconnection grace deadline (server time ms). Set while the
    /// player is unexpectedly disconnected during an active match.
    pub reconnect_deadline: Option<f64>,
}

impl Player {
    pub fn new(id: Uuid, name: String, role: Role, spawn: SpawnPoint) -> Self {
        let stats = RoleStats::for_role(role);
        Self {
            id,
            name,
            role,
            x: spawn.x,
            y: spawn.y,
            vx: 0.0,
            vy: 0.0,
            angle: 0.0,
            health: stats.max_health,
            connected: true,
            last_fire_time: 0.0,
            last_processed_seq: 0,
            input_queue: InputQueue::new(),
            reconnect_deadline: None,
        }
    }

    pub fn alive(&self) -> bool {
        self.health > 0.0
    }

    /// In-place reset for a new stage: full health, zero velocity,
    /// cleared input and cooldown, fresh spawn. The slot itself (and
    /// cumulative stats elsewhere) survive untouched.
    pub fn reset_for_stage(&mut self, spawn: SpawnPoint) {
        let stats = RoleStats::for_role(self.role);
        self.x = spawn.x;
        self.y = spawn.y;
        self.vx = 0.0;
        self.vy = 0.0;
        self.angle = 0.0;
        self.health = stats.max_health;
        self.last_fire_time = 0.0;
        self.input_queue.clear();
        // A player frozen in a grace window stays frozen; everyone
        // else is reaffirmed as connected.
        if self.reconnect_deadline.is_none() {
            self.connected = true;
        }
    }
}

/// Cumulative per-player stats, accumulated across all stages
#[derive(Debug, Clone, Copy, Default)]
pub struct PlayerStats {
    pub kills: u32,
    pub deaths: u32,
    pub damage_dealt: f32,
    pub shots_fired: u32,
    pub shots_hit: u32,
}

impl PlayerStats {
    /// Hit percentage with one decimal place
    pub fn accuracy(&self) -> f32 {
        if self.shots_fired == 0 {
            return 0.0;
        }
        (self.shots_hit as f32 / self.shots_fired as f32 * 1000.0).round() / 10.0
    }
}

/// True when an AABB of the given half-extent at (x, y) overlaps no
/// solid collision rect.
pub fn position_is_clear(grid: &CollisionGrid, x: f32, y: f32, radius: f32) -> bool {
    let mut probe_x = x;
    let mut probe_y = y;
    !super::grid::resolve_collisions(&mut probe_x, &mut probe_y, radius, grid, x, y).hit_any()
}

/// Validate a spawn point, nudging to the nearest clear neighbor when
/// the requested position lands on a solid tile. Searches the eight
/// surrounding tile offsets, cardinals before diagonals. Returns None
/// when everything nearby is blocked (recoverable; the caller logs and
/// keeps the original point).
pub fn find_clear_spawn(grid: &CollisionGrid, spawn: SpawnPoint) -> Option<SpawnPoint> {
    let radius = combat::PLAYER_RADIUS;
    if position_is_clear(grid, spawn.x, spawn.y, radius) {
        return Some(spawn);
    }

    let step = grid.tile_size();
    const OFFSETS: [(f32, f32); 8] = [
        (1.0, 0.0),
        (-1.0, 0.0),
        (0.0, 1.0),
        (0.0, -1.0),
        (1.0, 1.0),
        (1.0, -1.0),
        (-1.0, 1.0),
        (-1.0, -1.0),
    ];

    for (dx, dy) in OFFSETS {
        let candidate = SpawnPoint { x: spawn.x + dx * step, y: spawn.y + dy * step };
        if position_is_clear(grid, candidate.x, candidate.y, radius) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::{builtin_catalog, ArenaMap};

    fn test_map() -> ArenaMap {
        builtin_catalog().into_iter().next().unwrap()
    }

    #[test]
    fn stage_reset_restores_health_and_clears_state() {
        let map = test_map();
        let mut player = Player::new(Uuid::new_v4(), "p".into(), Role::Faran, map.spawn_guardians[0]);
        player.health = 0.0;
        player.vx = 50.0;
        player.last_fire_time = 4000.0;
        player.input_queue.push(Default::default());
        player.reset_for_stage(map.spawn_guardians[1]);
        assert_eq!(player.health, RoleStats::for_role(Role::Faran).max_health);
        assert_eq!(player.vx, 0.0);
        assert_eq!(player.last_fire_time, 0.0);
        assert!(player.input_queue.is_empty());
        assert!(player.connected);
        assert_eq!(player.x, map.spawn_guardians[1].x);
    }

    #[test]
    fn stage_reset_keeps_grace_freeze() {
        let map = test_map();
        let mut player = Player::new(Uuid::new_v4(), "p".into(), Role::Baran, map.spawn_guardians[1]);
        player.connected = false;
        player.reconnect_deadline = Some(90_000.0);
        player.reset_for_stage(map.spawn_guardians[1]);
        assert!(!player.connected);
        assert_eq!(player.reconnect_deadline, Some(90_000.0));
    }

    #[test]
    fn accuracy_rounds_to_one_decimal() {
        let stats = PlayerStats { shots_fired: 3, shots_hit: 1, ..Default::default() };
        assert_eq!(stats.accuracy(), 33.3);
        assert_eq!(PlayerStats::default().accuracy(), 0.0);
    }

    #[test]
    fn clear_spawn_passes_through_valid_points() {
        let map = test_map();
        let grid = map.collision_grid();
        let spawn = map.spawn_paran;
        assert_eq!(find_clear_spawn(&grid, spawn), Some(spawn));
    }

    #[test]
    fn blocked_spawn_nudges_to_neighbor_tile() {
        let map = test_map();
        let grid = map.collision_grid();
        // Dead center of a border wall tile
        let blocked = SpawnPoint { x: 16.0, y: 16.0 };
        let nudged = find_clear_spawn(&grid, blocked).expect("neighbor should be clear");
        assert_ne!(nudged, blocked);
        assert!(position_is_clear(&grid, nudged.x, nudged.y, combat::PLAYER_RADIUS));
    }
}
