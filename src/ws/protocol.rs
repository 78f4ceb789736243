//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Player roles. Exactly one of each per match: the paran hunts the two
/// guardian roles (faran, baran) in a best-of-three series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// High-health melee hunter: contact kills, smashes obstacles
    Paran,
    /// Ranged guardian
    Faran,
    /// Ranged guardian
    Baran,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Paran, Role::Faran, Role::Baran];

    /// True for the single melee "force" role
    pub fn is_paran(self) -> bool {
        matches!(self, Role::Paran)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Paran => "paran",
            Role::Faran => "faran",
            Role::Baran => "baran",
        }
    }
}

/// Which side won a stage or the match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Paran,
    Guardians,
}

/// Messages sent from client to server.
///
/// The `input` message is deliberately absent here: its shape is
/// validated field-by-field in `game::input` before it ever reaches a
/// room, so the session layer routes it from raw JSON instead of serde.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMsg {
    /// Request to join a match
    #[serde(rename_all = "camelCase")]
    Join {
        /// Display name (truncated server-side)
        name: Option<String>,
        /// Explicit role request (wins over lobby assignment)
        role: Option<Role>,
        /// Set when the join was brokered by a lobby
        #[serde(default)]
        from_lobby: bool,
        /// Lobby-negotiated role assignments, keyed by player id
        role_assignments: Option<HashMap<Uuid, Role>>,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp, echoed back unmodified
        t: u64,
    },

    /// Leave current match (consented)
    Leave,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMsg {
    /// Welcome message after connection
    #[serde(rename_all = "camelCase")]
    Welcome { player_id: Uuid, server_time: u64 },

    /// Player joined the room
    PlayerJoined { player: PlayerInfo },

    /// Player slot removed (consented leave or expired grace period)
    #[serde(rename_all = "camelCase")]
    PlayerLeft { player_id: Uuid, reason: String },

    /// All three roles filled; simulation begins
    #[serde(rename_all = "camelCase")]
    MatchStart { start_time: f64 },

    /// A new stage's simulation is live
    #[serde(rename_all = "camelCase")]
    StageStart { stage_number: u32, map_name: String },

    /// A stage concluded
    #[serde(rename_all = "camelCase")]
    StageEnd {
        stage_winner: Side,
        stage_number: u32,
        paran_wins: u32,
        guardian_wins: u32,
    },

    /// Upcoming stage identity, sent before any state mutation so
    /// observers can start their transition effect
    #[serde(rename_all = "camelCase")]
    StageTransition {
        stage_number: u32,
        arena_name: String,
        map_name: String,
        paran_wins: u32,
        guardian_wins: u32,
    },

    /// Match decided; room terminates after a grace window
    #[serde(rename_all = "camelCase")]
    MatchEnd {
        winner: Side,
        stats: HashMap<Uuid, PlayerMatchStats>,
        stage_results: Vec<StageResult>,
        duration: f64,
    },

    /// A player was killed
    #[serde(rename_all = "camelCase")]
    Kill {
        killer: Uuid,
        victim: Uuid,
        killer_role: Role,
        victim_role: Role,
    },

    /// State diff at the patch rate
    #[serde(rename_all = "camelCase")]
    Patch {
        tick: u64,
        server_time: f64,
        diff: StateDiff,
    },

    /// Pong response
    Pong { t: u64 },

    /// Error message
    Error { code: String, message: String },
}

/// Player identity for join notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub player_id: Uuid,
    pub name: String,
    pub role: Role,
}

/// Per-player view of authoritative state, included in diffs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub player_id: Uuid,
    pub name: String,
    pub role: Role,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub angle: f32,
    pub health: f32,
    pub connected: bool,
    pub last_processed_seq: u32,
}

/// Projectile view for diffs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectileView {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
}

/// Destructible obstacle view for diffs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObstacleView {
    pub tile_x: i32,
    pub tile_y: i32,
    pub hp: i32,
    pub max_hp: i32,
}

/// Ordered diff against the previously emitted state. Per-item add and
/// remove entries (never a bulk clear) so clients can keep per-item
/// subscriptions alive across updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDiff {
    pub players_added: Vec<PlayerView>,
    pub players_changed: Vec<PlayerView>,
    pub players_removed: Vec<Uuid>,
    pub projectiles_added: Vec<ProjectileView>,
    pub projectiles_changed: Vec<ProjectileView>,
    pub projectiles_removed: Vec<Uuid>,
    pub obstacles_added: Vec<ObstacleView>,
    pub obstacles_changed: Vec<ObstacleView>,
    /// Tile coordinates of obstacles destroyed since the last diff
    pub obstacles_removed: Vec<(i32, i32)>,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.players_added.is_empty()
            && self.players_changed.is_empty()
            && self.players_removed.is_empty()
            && self.projectiles_added.is_empty()
            && self.projectiles_changed.is_empty()
            && self.projectiles_removed.is_empty()
            && self.obstacles_added.is_empty()
            && self.obstacles_changed.is_empty()
            && self.obstacles_removed.is_empty()
    }
}

/// Cumulative per-player stats broadcast at match end
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerMatchStats {
    pub name: String,
    pub role: Role,
    pub kills: u32,
    pub deaths: u32,
    pub damage_dealt: f32,
    pub shots_fired: u32,
    pub shots_hit: u32,
    /// Hit percentage, one decimal place
    pub accuracy: f32,
}

/// Archived outcome of a concluded stage, including a snapshot of the
/// cumulative per-player stats as they stood when the stage ended
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    pub stage_number: u32,
    pub winner: Side,
    pub map_name: String,
    pub paran_wins: u32,
    pub guardian_wins: u32,
    pub stats: HashMap<Uuid, PlayerMatchStats>,
}
