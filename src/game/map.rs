//! Arena maps: tile classification, Tiled JSON ingestion, built-in catalog

use serde::Deserialize;

use super::grid::{CollisionGrid, CollisionRect, TileInfo};

pub const TILE_SIZE: f32 = 32.0;

// Tile ID ranges (1-based, matching Tiled firstgid=1). Three wall
// themes share a 96-tile block each: 48 canopy tiles then 48 front
// faces. Rocks are the only destructible tiles.
const THEME_BLOCK: u32 = 96;
const CANOPY_TILES: u32 = 48;
const WALL_THEMES: u32 = 3;
const ROCK_CANOPY_MIN: u32 = 289;
const ROCK_CANOPY_MAX: u32 = 296;

/// Sprite indices (0-based within a theme's canopy block) whose top
/// edge is exposed in the art. These get a shorter collision rect so
/// entities can visually overlap the canopy's top portion.
const CANOPY_SPRITE_INDICES: [u32; 13] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 15, 31, 41];

const FULL_RECT: CollisionRect = CollisionRect::full(TILE_SIZE);
const CANOPY_RECT: CollisionRect = CollisionRect { x: 0.0, y: 12.0, w: 32.0, h: 20.0 };

/// Classify a tile ID into collision info. Wall canopies are solid and
/// indestructible; rocks are destructible with tier HP; wall front
/// faces and everything else are passable.
pub fn tile_class(tile_id: u32) -> TileInfo {
    if tile_id == 0 {
        return TileInfo::empty();
    }

    // Wall canopy ranges: first 48 ids of each theme block
    if tile_id <= WALL_THEMES * THEME_BLOCK {
        let within_theme = (tile_id - 1) % THEME_BLOCK;
        if within_theme < CANOPY_TILES {
            let rect = if CANOPY_SPRITE_INDICES.contains(&within_theme) {
                CANOPY_RECT
            } else {
                FULL_RECT
            };
            return TileInfo {
                solid: true,
                destructible: false,
                hp: 0,
                tile_id,
                rect,
            };
        }
        // Front faces: visual only
        return TileInfo { tile_id, ..TileInfo::empty() };
    }

    if (ROCK_CANOPY_MIN..=ROCK_CANOPY_MAX).contains(&tile_id) {
        return TileInfo {
            solid: true,
            destructible: true,
            hp: rock_tier_hp(tile_id),
            tile_id,
            rect: FULL_RECT,
        };
    }

    // Rock fronts, floors, decorations
    TileInfo { tile_id, ..TileInfo::empty() }
}

/// Rock tier HP: heavy 5, medium 3, light 2
fn rock_tier_hp(tile_id: u32) -> i32 {
    match tile_id {
        289..=291 => 5,
        292..=294 => 3,
        295..=296 => 2,
        _ => 0,
    }
}

/// World-space point
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SpawnPoint {
    pub x: f32,
    pub y: f32,
}

/// One arena: tile data plus spawn points and display identity
#[derive(Debug, Clone)]
pub struct ArenaMap {
    pub name: String,
    pub display_name: String,
    /// Dimensions in tiles
    pub width: i32,
    pub height: i32,
    /// Flat "Walls" layer, row-major
    pub walls: Vec<u32>,
    pub spawn_paran: SpawnPoint,
    pub spawn_guardians: [SpawnPoint; 2],
}

impl ArenaMap {
    /// Build the stage's collision grid from the wall layer
    pub fn collision_grid(&self) -> CollisionGrid {
        let cells = self.walls.iter().map(|&id| tile_class(id)).collect();
        CollisionGrid::new(self.width, self.height, TILE_SIZE, cells)
    }

}

/// Map loading errors
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("invalid map JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("map has no layer named \"Walls\"")]
    MissingWallsLayer,

    #[error("walls layer size {got} does not match {want} ({width}x{height})")]
    SizeMismatch { got: usize, want: usize, width: i32, height: i32 },

    #[error("missing map property: {0}")]
    MissingProperty(&'static str),
}

#[derive(Deserialize)]
struct TiledMap {
    width: i32,
    height: i32,
    layers: Vec<TiledLayer>,
    #[serde(default)]
    properties: Vec<TiledProperty>,
}

#[derive(Deserialize)]
struct TiledLayer {
    name: String,
    #[serde(default)]
    data: Vec<u32>,
}

#[derive(Deserialize)]
struct TiledProperty {
    name: String,
    value: serde_json::Value,
}

/// Parse a Tiled-format JSON map. The "Walls" tile layer supplies
/// solidity; custom properties supply spawn points and display identity
/// (`name`, `displayName`, `spawnParanX/Y`, `spawnGuardian1X/Y`,
/// `spawnGuardian2X/Y`).
pub fn from_tiled_json(json: &str) -> Result<ArenaMap, MapError> {
    let tiled: TiledMap = serde_json::from_str(json)?;

    let walls = tiled
        .layers
        .iter()
        .find(|l| l.name == "Walls")
        .ok_or(MapError::MissingWallsLayer)?;

    let want = (tiled.width * tiled.height) as usize;
    if walls.data.len() != want {
        return Err(MapError::SizeMismatch {
            got: walls.data.len(),
            want,
            width: tiled.width,
            height: tiled.height,
        });
    }

    let prop_f32 = |key: &'static str| -> Result<f32, MapError> {
        tiled
            .properties
            .iter()
            .find(|p| p.name == key)
            .and_then(|p| p.value.as_f64())
            .map(|v| v as f32)
            .ok_or(MapError::MissingProperty(key))
    };
    let prop_str = |key: &'static str| -> Result<String, MapError> {
        tiled
            .properties
            .iter()
            .find(|p| p.name == key)
            .and_then(|p| p.value.as_str())
            .map(str::to_owned)
            .ok_or(MapError::MissingProperty(key))
    };

    Ok(ArenaMap {
        name: prop_str("name")?,
        display_name: prop_str("displayName")?,
        width: tiled.width,
        height: tiled.height,
        walls: walls.data.clone(),
        spawn_paran: SpawnPoint { x: prop_f32("spawnParanX")?, y: prop_f32("spawnParanY")? },
        spawn_guardians: [
            SpawnPoint { x: prop_f32("spawnGuardian1X")?, y: prop_f32("spawnGuardian1Y")? },
            SpawnPoint { x: prop_f32("spawnGuardian2X")?, y: prop_f32("spawnGuardian2Y")? },
        ],
    })
}

/// Build a wall layer from ASCII rows (used for built-in arenas and
/// tests). `#` full wall, `=` canopy-rect wall, `H`/`M`/`L` heavy,
/// medium and light rocks, anything else floor.
pub fn walls_from_ascii(rows: &[&str]) -> Vec<u32> {
    let mut walls = Vec::with_capacity(rows.len() * rows.first().map_or(0, |r| r.len()));
    for row in rows {
        for ch in row.chars() {
            walls.push(match ch {
                '#' => 11,  // full-rect wall canopy sprite
                '=' => 10,  // exposed-top canopy sprite (short rect)
                'H' => 289, // heavy rock, 5 hp
                'M' => 292, // medium rock, 3 hp
                'L' => 295, // light rock, 2 hp
                _ => 0,
            });
        }
    }
    walls
}

/// Built-in arena rotation: 25x19 tiles (800x608 px), one per stage of
/// the best-of-three.
pub fn builtin_catalog() -> Vec<ArenaMap> {
    let border = |interior: &[&str]| -> Vec<u32> {
        let width = 25usize;
        let mut rows: Vec<String> = Vec::with_capacity(19);
        rows.push("#".repeat(width));
        for row in interior {
            debug_assert_eq!(row.len(), width - 2);
            rows.push(format!("#{row}#"));
        }
        rows.push("#".repeat(width));
        let borrowed: Vec<&str> = rows.iter().map(String::as_str).collect();
        walls_from_ascii(&borrowed)
    };

    vec![
        ArenaMap {
            name: "test_arena".into(),
            display_name: "Test Arena".into(),
            width: 25,
            height: 19,
            walls: border(&[
                ".......................",
                ".......................",
                "....==........==.......",
                "....==........==.......",
                ".......................",
                "......MM....MM.........",
                "......MM....MM.........",
                ".......................",
                ".......................",
                ".......................",
                "......LL....LL.........",
                "......LL....LL.........",
                ".......................",
                "....==........==.......",
                "....==........==.......",
                ".......................",
                ".......................",
            ]),
            spawn_paran: SpawnPoint { x: 400.0, y: 304.0 },
            spawn_guardians: [
                SpawnPoint { x: 150.0, y: 150.0 },
                SpawnPoint { x: 650.0, y: 460.0 },
            ],
        },
        ArenaMap {
            name: "corridor_chaos".into(),
            display_name: "Corridor Chaos".into(),
            width: 25,
            height: 19,
            walls: border(&[
                ".......................",
                "..####....H....####....",
                ".......................",
                ".......................",
                "..==..####...####..==..",
                ".......................",
                "......L.........L......",
                "..####....MMM....####..",
                "......L.........L......",
                ".......................",
                "..==..####...####..==..",
                ".......................",
                ".......................",
                "..####....H....####....",
                ".......................",
                ".......................",
                ".......................",
            ]),
            spawn_paran: SpawnPoint { x: 400.0, y: 304.0 },
            spawn_guardians: [
                SpawnPoint { x: 100.0, y: 100.0 },
                SpawnPoint { x: 700.0, y: 500.0 },
            ],
        },
        ArenaMap {
            name: "cross_fire".into(),
            display_name: "Cross Fire".into(),
            width: 25,
            height: 19,
            walls: border(&[
                ".......................",
                ".......................",
                "......##.......##......",
                "......##..LLL..##......",
                ".......................",
                "..........MMM..........",
                "....##....MMM....##....",
                "....##...........##....",
                "........HH...HH........",
                "....##...........##....",
                "....##....MMM....##....",
                "..........MMM..........",
                ".......................",
                "......##..LLL..##......",
                "......##.......##......",
                ".......................",
                ".......................",
            ]),
            spawn_paran: SpawnPoint { x: 400.0, y: 304.0 },
            spawn_guardians: [
                SpawnPoint { x: 100.0, y: 500.0 },
                SpawnPoint { x: 700.0, y: 100.0 },
            ],
        },
    ]
}
