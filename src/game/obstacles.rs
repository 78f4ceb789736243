//! Destructible obstacle bookkeeping, keyed by tile coordinate

use std::collections::BTreeMap;

use super::grid::CollisionGrid;

/// One destructible tile's HP state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obstacle {
    pub tile_x: i32,
    pub tile_y: i32,
    pub hp: i32,
    pub max_hp: i32,
    pub destroyed: bool,
}

/// Per-stage registry of destructible obstacles. Seeded once at map
/// load; mutated by projectile damage and paran touch. Destruction is
/// permanent for the stage (the grid cell is cleared by the caller).
#[derive(Debug, Default)]
pub struct ObstacleRegistry {
    obstacles: BTreeMap<(i32, i32), Obstacle>,
}

impl ObstacleRegistry {
    /// Seed from every destructible cell in a freshly built grid
    pub fn from_grid(grid: &CollisionGrid) -> Self {
        let mut obstacles = BTreeMap::new();
        for ty in 0..grid.height() {
            for tx in 0..grid.width() {
                if let Some(info) = grid.tile(tx, ty) {
                    if info.destructible {
                        obstacles.insert(
                            (tx, ty),
                            Obstacle {
                                tile_x: tx,
                                tile_y: ty,
                                hp: info.hp,
                                max_hp: info.hp,
                                destroyed: false,
                            },
                        );
                    }
                }
            }
        }
        Self { obstacles }
    }

    pub fn get(&self, tile: (i32, i32)) -> Option<&Obstacle> {
        self.obstacles.get(&tile)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Obstacle> {
        self.obstacles.values()
    }

    pub fn len(&self) -> usize {
        self.obstacles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obstacles.is_empty()
    }

    /// Apply one point of projectile damage. Returns true when this
    /// damage destroyed the obstacle.
    pub fn damage(&mut self, tile: (i32, i32)) -> bool {
        match self.obstacles.get_mut(&tile) {
            Some(obstacle) if !obstacle.destroyed => {
                obstacle.hp -= 1;
                if obstacle.hp <= 0 {
                    obstacle.hp = 0;
                    obstacle.destroyed = true;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Paran touch: instant destruction regardless of remaining HP.
    /// Returns true when the tile held a live obstacle.
    pub fn smash(&mut self, tile: (i32, i32)) -> bool {
        match self.obstacles.get_mut(&tile) {
            Some(obstacle) if !obstacle.destroyed => {
                obstacle.hp = 0;
                obstacle.destroyed = true;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::builtin_catalog;

    #[test]
    fn seeds_every_destructible_tile() {
        let map = &builtin_catalog()[0];
        let grid = map.collision_grid();
        let registry = ObstacleRegistry::from_grid(&grid);
        assert!(!registry.is_empty());
        for obstacle in registry.iter() {
            let info = grid.tile(obstacle.tile_x, obstacle.tile_y).unwrap();
            assert!(info.destructible);
            assert_eq!(obstacle.hp, info.hp);
            assert_eq!(obstacle.hp, obstacle.max_hp);
        }
    }

    #[test]
    fn damage_counts_down_and_destroys_at_zero() {
        let map = &builtin_catalog()[0];
        let grid = map.collision_grid();
        let mut registry = ObstacleRegistry::from_grid(&grid);
        let tile = {
            let o = registry.iter().find(|o| o.max_hp == 2).expect("light rock");
            (o.tile_x, o.tile_y)
        };
        assert!(!registry.damage(tile));
        assert_eq!(registry.get(tile).unwrap().hp, 1);
        assert!(registry.damage(tile));
        let obstacle = registry.get(tile).unwrap();
        assert!(obstacle.destroyed);
        assert_eq!(obstacle.hp, 0);
        // Further damage is a no-op
        assert!(!registry.damage(tile));
    }

    #[test]
    fn smash_ignores_remaining_hp() {
        let map = &builtin_catalog()[1];
        let grid = map.collision_grid();
        let mut registry = ObstacleRegistry::from_grid(&grid);
        let tile = {
            let o = registry.iter().find(|o| o.max_hp == 5).expect("heavy rock");
            (o.tile_x, o.tile_y)
        };
        assert!(registry.smash(tile));
        assert!(registry.get(tile).unwrap().destroyed);
        assert!(!registry.smash(tile));
    }

    #[test]
    fn damage_on_unknown_tile_is_noop() {
        let mut registry = ObstacleRegistry::default();
        assert!(!registry.damage((3, 3)));
        assert!(!registry.smash((3, 3)));
    }
}
