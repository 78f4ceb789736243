//! Projectile simulation and contact combat

use std::collections::BTreeMap;
use uuid::Uuid;

use super::grid::CollisionGrid;
use super::obstacles::ObstacleRegistry;
use super::player::{Player, PlayerStats};
use super::role::{combat, RoleStats};
use crate::ws::protocol::Role;

/// Live projectile owned by the room
#[derive(Debug, Clone)]
pub struct Projectile {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// Owner role survives the owner's slot (for kill attribution)
    pub owner_role: Role,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub damage: f32,
    /// Server time at spawn (ms); lifetime gate
    pub spawn_time: f64,
}

impl Projectile {
    pub fn new(owner: &Player, stats: &RoleStats, server_time: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner.id,
            owner_role: owner.role,
            x: owner.x,
            y: owner.y,
            vx: owner.angle.cos() * stats.projectile_speed,
            vy: owner.angle.sin() * stats.projectile_speed,
            damage: stats.damage,
            spawn_time: server_time,
        }
    }
}

/// A player death this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillEvent {
    pub killer: Uuid,
    pub victim: Uuid,
    pub killer_role: Role,
    pub victim_role: Role,
}

/// Fire-cooldown gate and projectile spawn. The boundary is inclusive:
/// a shot at exactly `last_fire_time + fire_rate` succeeds.
pub fn try_fire(
    shooter: &mut Player,
    stats: &RoleStats,
    server_time: f64,
    shooter_stats: &mut PlayerStats,
) -> Option<Projectile> {
    if server_time - shooter.last_fire_time < stats.fire_rate {
        return None;
    }
    let projectile = Projectile::new(shooter, stats, server_time);
    shooter.last_fire_time = server_time;
    shooter_stats.shots_fired += 1;
    Some(projectile)
}

/// Advance all projectiles one fixed step: movement, lifetime expiry,
/// solid-tile contact (damaging destructible obstacles by 1 HP), and
/// player hits. At most one player is hit per projectile per tick; when
/// several overlap, the nearest is credited (deterministic tie-break,
/// player id ordering breaks exact distance ties).
pub fn step_projectiles(
    projectiles: &mut Vec<Projectile>,
    players: &mut BTreeMap<Uuid, Player>,
    match_stats: &mut BTreeMap<Uuid, PlayerStats>,
    grid: &mut CollisionGrid,
    obstacles: &mut ObstacleRegistry,
    server_time: f64,
    dt: f32,
) -> Vec<KillEvent> {
    let mut kills = Vec::new();

    // Backwards for stable in-place removal
    for i in (0..projectiles.len()).rev() {
        let proj = &mut projectiles[i];
        proj.x += proj.vx * dt;
        proj.y += proj.vy * dt;

        if server_time - proj.spawn_time > combat::PROJECTILE_LIFETIME {
            projectiles.remove(i);
            continue;
        }

        // Solid-tile contact. Out-of-bounds counts as solid, which also
        // retires projectiles that leave the arena.
        let tile = grid.world_to_tile(proj.x, proj.y);
        if grid.is_solid(tile.0, tile.1) {
            let destructible = grid
                .tile(tile.0, tile.1)
                .map(|info| info.destructible)
                .unwrap_or(false);
            if destructible && obstacles.damage(tile) {
                grid.clear_tile(tile.0, tile.1);
            }
            projectiles.remove(i);
            continue;
        }

        // Nearest living non-owner within combined radius
        let hit_range = combat::PLAYER_RADIUS + combat::PROJECTILE_RADIUS;
        let target = players
            .values()
            .filter(|p| p.id != proj.owner_id && p.alive())
            .map(|p| {
                let dx = proj.x - p.x;
                let dy = proj.y - p.y;
                (p.id, (dx * dx + dy * dy).sqrt())
            })
            .filter(|&(_, dist)| dist < hit_range)
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));

        let Some((target_id, _)) = target else {
            continue;
        };

        let (damage, owner_id, owner_role) = (proj.damage, proj.owner_id, proj.owner_role);
        projectiles.remove(i);

        let target = players.get_mut(&target_id).expect("target selected from map");
        let was_alive = target.alive();
        target.health = (target.health - damage).max(0.0);
        let died = was_alive && !target.alive();
        let victim_role = target.role;

        let shooter_stats = match_stats.entry(owner_id).or_default();
        shooter_stats.shots_hit += 1;
        shooter_stats.damage_dealt += damage;
        if died {
            shooter_stats.kills += 1;
            match_stats.entry(target_id).or_default().deaths += 1;
            kills.push(KillEvent {
                killer: owner_id,
                victim: target_id,
                killer_role: owner_role,
                victim_role,
            });
        }
    }

    kills
}

/// Contact kill: a living paran kills every living guardian within
/// `2 x player radius` outright, regardless of remaining health.
/// Independent of projectile damage; both can land in the same tick.
pub fn resolve_contact_kills(
    players: &mut BTreeMap<Uuid, Player>,
    match_stats: &mut BTreeMap<Uuid, PlayerStats>,
) -> Vec<KillEvent> {
    let paran = players
        .values()
        .find(|p| p.role.is_paran() && p.alive())
        .map(|p| (p.id, p.x, p.y));
    let Some((paran_id, px, py)) = paran else {
        return Vec::new();
    };

    let mut kills = Vec::new();
    let victims: Vec<Uuid> = players
        .values()
        .filter(|p| !p.role.is_paran() && p.alive())
        .filter(|p| {
            let dx = px - p.x;
            let dy = py - p.y;
            (dx * dx + dy * dy).sqrt() <= combat::CONTACT_KILL_RANGE
        })
        .map(|p| p.id)
        .collect();

    for victim_id in victims {
        let victim = players.get_mut(&victim_id).expect("victim selected from map");
        victim.health = 0.0;
        let victim_role = victim.role;
        match_stats.entry(paran_id).or_default().kills += 1;
        match_stats.entry(victim_id).or_default().deaths += 1;
        kills.push(KillEvent {
            killer: paran_id,
            victim: victim_id,
            killer_role: Role::Paran,
            victim_role,
        });
    }

    kills
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::{builtin_catalog, SpawnPoint};

    const DT: f32 = 1.0 / 60.0;

    fn world() -> (CollisionGrid, ObstacleRegistry) {
        let map = &builtin_catalog()[0];
        let grid = map.collision_grid();
        let obstacles = ObstacleRegistry::from_grid(&grid);
        (grid, obstacles)
    }

    fn player_at(role: Role, x: f32, y: f32) -> Player {
        Player::new(Uuid::new_v4(), role.as_str().into(), role, SpawnPoint { x, y })
    }

    #[test]
    fn fire_cooldown_boundary_is_inclusive() {
        let mut shooter = player_at(Role::Faran, 400.0, 300.0);
        let stats = RoleStats::for_role(Role::Faran);
        let mut shooter_stats = PlayerStats::default();

        shooter.last_fire_time = 1000.0;
        // One tick before the boundary: silently ignored
        assert!(try_fire(&mut shooter, &stats, 1000.0 + stats.fire_rate - 1.0, &mut shooter_stats).is_none());
        assert_eq!(shooter_stats.shots_fired, 0);
        // Exactly at the boundary: fires
        let proj = try_fire(&mut shooter, &stats, 1000.0 + stats.fire_rate, &mut shooter_stats);
        assert!(proj.is_some());
        assert_eq!(shooter_stats.shots_fired, 1);
        assert_eq!(shooter.last_fire_time, 1000.0 + stats.fire_rate);
    }

    #[test]
    fn projectile_travels_along_facing() {
        let mut shooter = player_at(Role::Baran, 400.0, 300.0);
        shooter.angle = std::f32::consts::FRAC_PI_2; // facing down
        let stats = RoleStats::for_role(Role::Baran);
        let proj = Projectile::new(&shooter, &stats, 0.0);
        assert!(proj.vx.abs() < 1e-3);
        assert!((proj.vy - stats.projectile_speed).abs() < 1e-3);
    }

    #[test]
    fn expired_projectile_is_removed() {
        let (mut grid, mut obstacles) = world();
        let shooter = player_at(Role::Faran, 400.0, 300.0);
        let stats = RoleStats::for_role(Role::Faran);
        let mut projectiles = vec![Projectile::new(&shooter, &stats, 0.0)];
        let mut players = BTreeMap::new();
        let mut match_stats = BTreeMap::new();

        let kills = step_projectiles(
            &mut projectiles,
            &mut players,
            &mut match_stats,
            &mut grid,
            &mut obstacles,
            combat::PROJECTILE_LIFETIME + 1.0,
            DT,
        );
        assert!(kills.is_empty());
        assert!(projectiles.is_empty());
    }

    #[test]
    fn projectile_chips_obstacle_and_clears_cell_at_zero() {
        let (mut grid, mut obstacles) = world();
        let target_tile = {
            let o = obstacles.iter().find(|o| o.max_hp == 2).expect("light rock");
            (o.tile_x, o.tile_y)
        };
        let tile_center_x = target_tile.0 as f32 * 32.0 + 16.0;
        let tile_center_y = target_tile.1 as f32 * 32.0 + 16.0;

        let shooter = player_at(Role::Faran, tile_center_x, tile_center_y);
        let stats = RoleStats::for_role(Role::Faran);
        let mut players = BTreeMap::new();
        let mut match_stats = BTreeMap::new();

        // Stationary projectile parked inside the tile
        let mut mk = || {
            let mut p = Projectile::new(&shooter, &stats, 0.0);
            p.vx = 0.0;
            p.vy = 0.0;
            p
        };

        let mut projectiles = vec![mk()];
        step_projectiles(&mut projectiles, &mut players, &mut match_stats, &mut grid, &mut obstacles, 1.0, DT);
        assert!(projectiles.is_empty());
        assert_eq!(obstacles.get(target_tile).unwrap().hp, 1);
        assert!(grid.is_solid(target_tile.0, target_tile.1));

        let mut projectiles = vec![mk()];
        step_projectiles(&mut projectiles, &mut players, &mut match_stats, &mut grid, &mut obstacles, 1.0, DT);
        let obstacle = obstacles.get(target_tile).unwrap();
        assert!(obstacle.destroyed);
        assert_eq!(obstacle.hp, 0);
        assert!(!grid.is_solid(target_tile.0, target_tile.1));
    }

    #[test]
    fn nearest_overlapping_player_is_credited() {
        let (mut grid, mut obstacles) = world();
        let shooter = player_at(Role::Paran, 300.0, 300.0);
        let stats = RoleStats::for_role(Role::Paran);

        let near = player_at(Role::Faran, 402.0, 300.0);
        let far = player_at(Role::Baran, 410.0, 300.0);
        let near_id = near.id;
        let far_id = far.id;

        let mut players = BTreeMap::new();
        players.insert(near.id, near);
        players.insert(far.id, far);
        players.insert(shooter.id, shooter.clone());
        let mut match_stats = BTreeMap::new();

        let mut proj = Projectile::new(&shooter, &stats, 0.0);
        proj.x = 400.0;
        proj.y = 300.0;
        proj.vx = 0.0;
        proj.vy = 0.0;
        let mut projectiles = vec![proj];

        step_projectiles(&mut projectiles, &mut players, &mut match_stats, &mut grid, &mut obstacles, 1.0, DT);
        assert!(projectiles.is_empty());
        assert!(players[&near_id].health < RoleStats::for_role(Role::Faran).max_health);
        assert_eq!(players[&far_id].health, RoleStats::for_role(Role::Baran).max_health);
        assert_eq!(match_stats[&shooter.id].shots_hit, 1);
    }

    #[test]
    fn projectile_kill_updates_both_stat_lines() {
        let (mut grid, mut obstacles) = world();
        let shooter = player_at(Role::Paran, 300.0, 300.0);
        let stats = RoleStats::for_role(Role::Paran);
        let mut victim = player_at(Role::Faran, 400.0, 300.0);
        victim.health = stats.damage; // exactly lethal
        let victim_id = victim.id;

        let mut players = BTreeMap::new();
        players.insert(victim.id, victim);
        let mut match_stats = BTreeMap::new();

        let mut proj = Projectile::new(&shooter, &stats, 0.0);
        proj.x = 400.0;
        proj.y = 300.0;
        proj.vx = 0.0;
        proj.vy = 0.0;
        let mut projectiles = vec![proj];

        let kills = step_projectiles(&mut projectiles, &mut players, &mut match_stats, &mut grid, &mut obstacles, 1.0, DT);
        assert_eq!(kills.len(), 1);
        assert_eq!(kills[0].killer, shooter.id);
        assert_eq!(kills[0].victim, victim_id);
        assert_eq!(kills[0].killer_role, Role::Paran);
        assert!(!players[&victim_id].alive());
        assert_eq!(match_stats[&shooter.id].kills, 1);
        assert_eq!(match_stats[&victim_id].deaths, 1);
    }

    #[test]
    fn dead_players_are_not_hit() {
        let (mut grid, mut obstacles) = world();
        let shooter = player_at(Role::Faran, 300.0, 300.0);
        let stats = RoleStats::for_role(Role::Faran);
        let mut corpse = player_at(Role::Baran, 400.0, 300.0);
        corpse.health = 0.0;
        let corpse_id = corpse.id;

        let mut players = BTreeMap::new();
        players.insert(corpse.id, corpse);
        let mut match_stats = BTreeMap::new();

        let mut proj = Projectile::new(&shooter, &stats, 0.0);
        proj.x = 400.0;
        proj.y = 300.0;
        proj.vx = 0.0;
        proj.vy = 0.0;
        let mut projectiles = vec![proj];

        step_projectiles(&mut projectiles, &mut players, &mut match_stats, &mut grid, &mut obstacles, 1.0, DT);
        // Flies straight through
        assert_eq!(projectiles.len(), 1);
        assert_eq!(match_stats.get(&corpse_id).map(|s| s.deaths), None);
    }

    #[test]
    fn contact_kill_ignores_remaining_health() {
        let paran = player_at(Role::Paran, 400.0, 300.0);
        let guardian = player_at(Role::Faran, 400.0 + combat::CONTACT_KILL_RANGE, 300.0);
        let safe = player_at(Role::Baran, 400.0 + combat::CONTACT_KILL_RANGE + 1.0, 300.0);
        let (paran_id, guardian_id, safe_id) = (paran.id, guardian.id, safe.id);

        let mut players = BTreeMap::new();
        players.insert(paran.id, paran);
        players.insert(guardian.id, guardian);
        players.insert(safe.id, safe);
        let mut match_stats = BTreeMap::new();

        let kills = resolve_contact_kills(&mut players, &mut match_stats);
        assert_eq!(kills.len(), 1);
        assert_eq!(kills[0].killer, paran_id);
        assert_eq!(kills[0].victim, guardian_id);
        assert_eq!(players[&guardian_id].health, 0.0);
        assert!(players[&safe_id].alive());
        assert_eq!(match_stats[&paran_id].kills, 1);
    }

    #[test]
    fn dead_paran_cannot_contact_kill() {
        let mut paran = player_at(Role::Paran, 400.0, 300.0);
        paran.health = 0.0;
        let guardian = player_at(Role::Faran, 400.0, 300.0);
        let guardian_id = guardian.id;

        let mut players = BTreeMap::new();
        players.insert(paran.id, paran);
        players.insert(guardian.id, guardian);
        let mut match_stats = BTreeMap::new();

        assert!(resolve_contact_kills(&mut players, &mut match_stats).is_empty());
        assert!(players[&guardian_id].alive());
    }
}
