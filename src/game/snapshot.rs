//! Diff-based state broadcasting

use std::collections::BTreeMap;
use uuid::Uuid;

use super::combat::Projectile;
use super::obstacles::ObstacleRegistry;
use super::player::Player;
use crate::ws::protocol::{ObstacleView, PlayerView, ProjectileView, StateDiff};

fn player_view(player: &Player) -> PlayerView {
    PlayerView {
        player_id: player.id,
        name: player.name.clone(),
        role: player.role,
        x: player.x,
        y: player.y,
        vx: player.vx,
        vy: player.vy,
        angle: player.angle,
        health: player.health,
        connected: player.connected,
        last_processed_seq: player.last_processed_seq,
    }
}

fn projectile_view(proj: &Projectile) -> ProjectileView {
    ProjectileView {
        id: proj.id,
        owner_id: proj.owner_id,
        x: proj.x,
        y: proj.y,
        vx: proj.vx,
        vy: proj.vy,
    }
}

/// Computes per-tick state diffs against the last emitted snapshot.
/// Every entity gets per-item added/changed/removed entries; a stage
/// swap therefore shows up as removals followed by additions, never a
/// bulk reset. Iteration is over ordered maps, so diff entry order is
/// stable across runs.
#[derive(Default)]
pub struct SnapshotBuilder {
    players: BTreeMap<Uuid, PlayerView>,
    projectiles: BTreeMap<Uuid, ProjectileView>,
    obstacles: BTreeMap<(i32, i32), ObstacleView>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff current authoritative state against the previous emission
    /// and remember the new state as the next baseline.
    pub fn diff(
        &mut self,
        players: &BTreeMap<Uuid, Player>,
        projectiles: &[Projectile],
        obstacles: &ObstacleRegistry,
    ) -> StateDiff {
        let mut diff = StateDiff::default();

        // Players
        let mut next_players = BTreeMap::new();
        for player in players.values() {
            let view = player_view(player);
            match self.players.get(&player.id) {
                None => diff.players_added.push(view.clone()),
                Some(prev) if *prev != view => diff.players_changed.push(view.clone()),
                Some(_) => {}
            }
            next_players.insert(player.id, view);
        }
        for id in self.players.keys() {
            if !next_players.contains_key(id) {
                diff.players_removed.push(*id);
            }
        }

        // Projectiles
        let mut next_projectiles = BTreeMap::new();
        for proj in projectiles {
            let view = projectile_view(proj);
            match self.projectiles.get(&proj.id) {
                None => diff.projectiles_added.push(view.clone()),
                Some(prev) if *prev != view => diff.projectiles_changed.push(view.clone()),
                Some(_) => {}
            }
            next_projectiles.insert(proj.id, view);
        }
        for id in self.projectiles.keys() {
            if !next_projectiles.contains_key(id) {
                diff.projectiles_removed.push(*id);
            }
        }

        // Obstacles. Destroyed obstacles leave the view entirely.
        let mut next_obstacles = BTreeMap::new();
        for obstacle in obstacles.iter().filter(|o| !o.destroyed) {
            let view = ObstacleView {
                tile_x: obstacle.tile_x,
                tile_y: obstacle.tile_y,
                hp: obstacle.hp,
                max_hp: obstacle.max_hp,
            };
            let key = (obstacle.tile_x, obstacle.tile_y);
            match self.obstacles.get(&key) {
                None => diff.obstacles_added.push(view.clone()),
                Some(prev) if *prev != view => diff.obstacles_changed.push(view.clone()),
                Some(_) => {}
            }
            next_obstacles.insert(key, view);
        }
        for key in self.obstacles.keys() {
            if !next_obstacles.contains_key(key) {
                diff.obstacles_removed.push(*key);
            }
        }

        self.players = next_players;
        self.projectiles = next_projectiles;
        self.obstacles = next_obstacles;
        diff
    }

    /// Forget the baseline so the next diff re-adds everything. Used
    /// when a client needs a full resync (e.g. reconnection).
    pub fn reset(&mut self) {
        self.players.clear();
        self.projectiles.clear();
        self.obstacles.clear();
    }
}
