//! Room state and authoritative tick loop

use dashmap::DashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::util::time::{tick_delta, FIXED_TIMESTEP_MS, TICK_DURATION_MICROS};
use crate::ws::protocol::{
    PlayerInfo, PlayerMatchStats, Role, ServerMsg, Side, StageResult,
};

use super::combat::{resolve_contact_kills, step_projectiles, try_fire, KillEvent, Projectile};
use super::grid::CollisionGrid;
use super::input::InputFrame;
use super::map::{builtin_catalog, ArenaMap, SpawnPoint};
use super::obstacles::ObstacleRegistry;
use super::physics::{apply_movement, update_facing};
use super::player::{find_clear_spawn, Player, PlayerStats};
use super::role::{combat, RoleStats};
use super::snapshot::SnapshotBuilder;
use super::{RoomEvent, RoomInbound};

/// Stage wins needed to take the match (best of three)
pub const STAGES_TO_WIN: u32 = 2;

/// Freeze after a stage is decided, before teardown begins (ms)
pub const STAGE_END_PAUSE_MS: f64 = 3000.0;

/// Delay between the transition announcement and the stage start
/// broadcast; clients run their wipe effect in this window (ms)
pub const TRANSITION_SETUP_MS: f64 = 1000.0;

/// Countdown after the stage start broadcast, before input applies (ms)
pub const TRANSITION_COUNTDOWN_MS: f64 = 2000.0;

/// Room lifetime after the match end broadcast (ms)
pub const MATCH_END_SHUTDOWN_MS: f64 = 15_000.0;

/// Display names are truncated, never rejected
const MAX_NAME_LEN: usize = 20;

/// Accumulator clamp so a stalled task never runs a catch-up burst
const MAX_FRAME_MS: f64 = 250.0;

const ROOM_CAPACITY: usize = 3;

/// How long an empty waiting room keeps ticking before shutting down;
/// covers the routing latency between party formation and join events
const WAITING_IDLE_SHUTDOWN_MS: f64 = 10_000.0;

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// Waiting for all three roles to fill
    Waiting,
    /// Simulation live, inputs apply
    Playing,
    /// Stage decided, world frozen for the result banner
    StageEnd,
    /// Arena swap in progress
    StageTransition,
    /// Match decided, room draining until shutdown
    MatchEnd,
}

/// Room state (owned by the room task)
pub struct RoomState {
    pub id: Uuid,
    pub seed: u64,
    pub phase: MatchPhase,
    pub tick: u64,
    /// Simulation clock in ms; advances by exactly one fixed step per
    /// tick, so every deadline below is expressed in it
    pub server_time: f64,
    pub players: BTreeMap<Uuid, Player>,
    /// Identity of everyone who ever joined; survives removal so the
    /// final stats screen can name departed players
    pub roster: BTreeMap<Uuid, PlayerInfo>,
    pub match_stats: BTreeMap<Uuid, PlayerStats>,
    pub projectiles: Vec<Projectile>,
    pub grid: CollisionGrid,
    pub obstacles: ObstacleRegistry,
    catalog: Vec<ArenaMap>,
    map_index: usize,
    pub stage_number: u32,
    pub paran_wins: u32,
    pub guardian_wins: u32,
    pub stage_results: Vec<StageResult>,
    /// Remaining stage time (ms); elapse hands the stage to the guardians
    stage_timer_ms: f64,
    match_start_time: Option<f64>,
    /// Next phase boundary in server time
    phase_deadline: f64,
    /// Mid-transition boundary for the stage start broadcast
    stage_start_deadline: f64,
    stage_start_sent: bool,
}

impl RoomState {
    pub fn new(id: Uuid, seed: u64, stage_duration_ms: f64) -> Self {
        let catalog = builtin_catalog();
        // The seed picks the opening arena; rotation from there is
        // sequential, so the whole series is reproducible from the seed.
        let map_index = ChaCha8Rng::seed_from_u64(seed).gen_range(0..catalog.len());
        let grid = catalog[map_index].collision_grid();
        let obstacles = ObstacleRegistry::from_grid(&grid);

        Self {
            id,
            seed,
            phase: MatchPhase::Waiting,
            tick: 0,
            server_time: 0.0,
            players: BTreeMap::new(),
            roster: BTreeMap::new(),
            match_stats: BTreeMap::new(),
            projectiles: Vec::new(),
            grid,
            obstacles,
            catalog,
            map_index,
            stage_number: 0,
            paran_wins: 0,
            guardian_wins: 0,
            stage_results: Vec::new(),
            stage_timer_ms: stage_duration_ms,
            match_start_time: None,
            phase_deadline: 0.0,
            stage_start_deadline: 0.0,
            stage_start_sent: false,
        }
    }

    pub fn current_map(&self) -> &ArenaMap {
        &self.catalog[self.map_index]
    }

    fn spawn_for_role(&self, role: Role) -> SpawnPoint {
        let map = self.current_map();
        match role {
            Role::Paran => map.spawn_paran,
            Role::Faran => map.spawn_guardians[0],
            Role::Baran => map.spawn_guardians[1],
        }
    }

    /// First unclaimed role, honoring an explicit request and then the
    /// lobby's assignment before falling back to join order.
    fn resolve_role(
        &self,
        player_id: Uuid,
        requested: Option<Role>,
        from_lobby: bool,
        assignments: Option<&HashMap<Uuid, Role>>,
    ) -> Option<Role> {
        let free = |role: Role| !self.players.values().any(|p| p.role == role);

        if let Some(role) = requested {
            if free(role) {
                return Some(role);
            }
        }
        if from_lobby {
            if let Some(&role) = assignments.and_then(|map| map.get(&player_id)) {
                if free(role) {
                    return Some(role);
                }
            }
        }
        Role::ALL.into_iter().find(|&role| free(role))
    }

    /// Combat outcome of the current stage, if decided. The paran's
    /// death is checked first, so a tick that kills everyone still has
    /// exactly one winner: the guardians.
    fn stage_winner(&self) -> Option<Side> {
        let paran_alive = self.players.values().any(|p| p.role.is_paran() && p.alive());
        if !paran_alive {
            return Some(Side::Guardians);
        }
        let guardian_alive = self.players.values().any(|p| !p.role.is_paran() && p.alive());
        if !guardian_alive {
            return Some(Side::Paran);
        }
        None
    }

    /// Cumulative stats for everyone on the roster, departed players
    /// included. Snapshotted into each stage archive entry and into the
    /// match end broadcast.
    fn collect_stats(&self) -> HashMap<Uuid, PlayerMatchStats> {
        self.roster
            .iter()
            .map(|(&id, info)| {
                let s = self.match_stats.get(&id).copied().unwrap_or_default();
                (
                    id,
                    PlayerMatchStats {
                        name: info.name.clone(),
                        role: info.role,
                        kills: s.kills,
                        deaths: s.deaths,
                        damage_dealt: s.damage_dealt,
                        shots_fired: s.shots_fired,
                        shots_hit: s.shots_hit,
                        accuracy: s.accuracy(),
                    },
                )
            })
            .collect()
    }
}

/// Handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    pub id: Uuid,
    pub inbound_tx: mpsc::Sender<RoomInbound>,
    pub broadcast_tx: broadcast::Sender<ServerMsg>,
    pub player_count: Arc<std::sync::atomic::AtomicUsize>,
}

impl RoomHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// Registry of all active rooms
pub struct RoomRegistry {
    rooms: DashMap<Uuid, RoomHandle>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self { rooms: DashMap::new() }
    }

    pub fn get(&self, id: &Uuid) -> Option<RoomHandle> {
        self.rooms.get(id).map(|r| r.value().clone())
    }

    pub fn insert(&self, handle: RoomHandle) {
        self.rooms.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<RoomHandle> {
        self.rooms.remove(id).map(|(_, h)| h)
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms.iter().map(|r| r.value().player_count()).sum()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative game room. Single writer: every piece of match
/// state is owned by this task, and sessions only ever enqueue events.
pub struct GameRoom {
    state: RoomState,
    inbound_rx: mpsc::Receiver<RoomInbound>,
    broadcast_tx: broadcast::Sender<ServerMsg>,
    snapshot: SnapshotBuilder,
    player_count: Arc<std::sync::atomic::AtomicUsize>,
    reconnect_grace_ms: f64,
    stage_duration_ms: f64,
    /// Server time at which a waiting room last became empty
    waiting_empty_since: Option<f64>,
}

impl GameRoom {
    pub fn new(id: Uuid, seed: u64, config: &Config) -> (Self, RoomHandle) {
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (broadcast_tx, _) = broadcast::channel(256);
        let player_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let handle = RoomHandle {
            id,
            inbound_tx,
            broadcast_tx: broadcast_tx.clone(),
            player_count: player_count.clone(),
        };

        let room = Self {
            state: RoomState::new(id, seed, config.stage_duration_ms),
            inbound_rx,
            broadcast_tx,
            snapshot: SnapshotBuilder::new(),
            player_count,
            reconnect_grace_ms: config.reconnect_grace_secs as f64 * 1000.0,
            stage_duration_ms: config.stage_duration_ms,
            waiting_empty_since: None,
        };

        (room, handle)
    }

    /// Run the authoritative tick loop until the room terminates
    pub async fn run(mut self) {
        info!(room_id = %self.state.id, seed = self.state.seed, "room started");

        let mut ticker = interval(Duration::from_micros(TICK_DURATION_MICROS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut last = Instant::now();
        let mut accumulator_ms = 0.0f64;

        loop {
            ticker.tick().await;

            let now = Instant::now();
            accumulator_ms += now.duration_since(last).as_secs_f64() * 1000.0;
            last = now;
            accumulator_ms = accumulator_ms.min(MAX_FRAME_MS);

            self.process_events();

            while accumulator_ms >= FIXED_TIMESTEP_MS {
                self.fixed_tick();
                accumulator_ms -= FIXED_TIMESTEP_MS;
            }

            if self.should_terminate() {
                break;
            }
        }

        info!(room_id = %self.state.id, "room terminated");
    }

    fn should_terminate(&self) -> bool {
        if self.state.phase == MatchPhase::MatchEnd
            && self.state.server_time >= self.state.phase_deadline
        {
            return true;
        }
        if let Some(since) = self.waiting_empty_since {
            if self.state.server_time - since >= WAITING_IDLE_SHUTDOWN_MS {
                return true;
            }
        }
        self.state.players.is_empty() && self.state.phase != MatchPhase::Waiting
    }

    fn broadcast(&self, msg: ServerMsg) {
        // Send fails only when nobody is listening
        let _ = self.broadcast_tx.send(msg);
    }

    /// Drain all pending session events
    fn process_events(&mut self) {
        while let Ok(inbound) = self.inbound_rx.try_recv() {
            self.handle_event(inbound);
        }
    }

    fn handle_event(&mut self, inbound: RoomInbound) {
        let player_id = inbound.player_id;
        match inbound.event {
            RoomEvent::Join { name, role, from_lobby, role_assignments } => {
                self.handle_join(player_id, name, role, from_lobby, role_assignments);
            }
            RoomEvent::Input(frame) => self.handle_input(player_id, frame),
            RoomEvent::Leave { consented } => self.handle_leave(player_id, consented),
            RoomEvent::Reconnect => self.handle_reconnect(player_id),
        }
    }

    fn handle_join(
        &mut self,
        player_id: Uuid,
        name: Option<String>,
        role: Option<Role>,
        from_lobby: bool,
        role_assignments: Option<HashMap<Uuid, Role>>,
    ) {
        if self.state.players.contains_key(&player_id) {
            warn!(room_id = %self.state.id, player_id = %player_id, "player already in room");
            return;
        }
        if self.state.phase != MatchPhase::Waiting {
            self.broadcast(ServerMsg::Error {
                code: "match_started".to_string(),
                message: "Match already in progress".to_string(),
            });
            return;
        }
        if self.state.players.len() >= ROOM_CAPACITY {
            self.broadcast(ServerMsg::Error {
                code: "room_full".to_string(),
                message: "Room is full".to_string(),
            });
            return;
        }

        let Some(role) =
            self.state
                .resolve_role(player_id, role, from_lobby, role_assignments.as_ref())
        else {
            self.broadcast(ServerMsg::Error {
                code: "room_full".to_string(),
                message: "All roles taken".to_string(),
            });
            return;
        };

        let name = name
            .filter(|n| !n.trim().is_empty())
            .map(|n| n.chars().take(MAX_NAME_LEN).collect::<String>())
            .unwrap_or_else(|| format!("player_{}", &player_id.to_string()[..8]));

        let requested = self.state.spawn_for_role(role);
        let spawn = match find_clear_spawn(&self.state.grid, requested) {
            Some(spawn) => spawn,
            None => {
                warn!(
                    room_id = %self.state.id,
                    role = role.as_str(),
                    "spawn point blocked with no clear neighbor, using as-is"
                );
                requested
            }
        };

        let player = Player::new(player_id, name.clone(), role, spawn);
        let info = PlayerInfo { player_id, name, role };

        self.state.players.insert(player_id, player);
        self.state.roster.insert(player_id, info.clone());
        self.state.match_stats.entry(player_id).or_default();
        self.player_count
            .store(self.state.players.len(), std::sync::atomic::Ordering::Relaxed);

        self.broadcast(ServerMsg::PlayerJoined { player: info });

        info!(
            room_id = %self.state.id,
            player_id = %player_id,
            role = role.as_str(),
            player_count = self.state.players.len(),
            "player joined room"
        );

        if self.state.players.len() == ROOM_CAPACITY {
            self.start_match();
        }
    }

    fn start_match(&mut self) {
        self.state.phase = MatchPhase::Playing;
        self.state.match_start_time = Some(self.state.server_time);
        self.state.stage_number = 1;
        self.state.stage_timer_ms = self.stage_duration_ms;

        self.broadcast(ServerMsg::MatchStart { start_time: self.state.server_time });
        self.broadcast(ServerMsg::StageStart {
            stage_number: 1,
            map_name: self.state.current_map().name.clone(),
        });

        info!(
            room_id = %self.state.id,
            map = %self.state.current_map().name,
            "match started"
        );
    }

    fn handle_input(&mut self, player_id: Uuid, frame: InputFrame) {
        if let Some(player) = self.state.players.get_mut(&player_id) {
            if player.connected {
                player.input_queue.push(frame);
            }
        }
    }

    fn handle_leave(&mut self, player_id: Uuid, consented: bool) {
        if consented {
            self.remove_player(player_id, "left");
            return;
        }

        let in_active_match = matches!(
            self.state.phase,
            MatchPhase::Playing | MatchPhase::StageEnd | MatchPhase::StageTransition
        );
        if !in_active_match {
            self.remove_player(player_id, "disconnected");
            return;
        }

        if let Some(player) = self.state.players.get_mut(&player_id) {
            // Frozen in place for the grace window
            player.connected = false;
            player.vx = 0.0;
            player.vy = 0.0;
            player.input_queue.clear();
            player.reconnect_deadline = Some(self.state.server_time + self.reconnect_grace_ms);
            info!(
                room_id = %self.state.id,
                player_id = %player_id,
                grace_ms = self.reconnect_grace_ms,
                "player disconnected mid-match, holding slot"
            );
        }
    }

    fn handle_reconnect(&mut self, player_id: Uuid) {
        let Some(player) = self.state.players.get_mut(&player_id) else {
            warn!(room_id = %self.state.id, player_id = %player_id, "reconnect for unknown player");
            return;
        };
        if player.reconnect_deadline.is_none() {
            warn!(room_id = %self.state.id, player_id = %player_id, "reconnect without grace window");
            return;
        }

        player.connected = true;
        player.reconnect_deadline = None;
        player.input_queue.clear();
        // Replay the full world as additions in the next patch
        self.snapshot.reset();

        info!(room_id = %self.state.id, player_id = %player_id, "player reconnected");
    }

    fn remove_player(&mut self, player_id: Uuid, reason: &str) {
        if self.state.players.remove(&player_id).is_none() {
            return;
        }
        self.player_count
            .store(self.state.players.len(), std::sync::atomic::Ordering::Relaxed);
        self.broadcast(ServerMsg::PlayerLeft { player_id, reason: reason.to_string() });
        info!(
            room_id = %self.state.id,
            player_id = %player_id,
            reason,
            "player removed from room"
        );
    }

    /// One fixed simulation step. The only place state mutates.
    fn fixed_tick(&mut self) {
        self.state.tick += 1;
        self.state.server_time += FIXED_TIMESTEP_MS;

        if self.state.phase == MatchPhase::Waiting && self.state.players.is_empty() {
            self.waiting_empty_since.get_or_insert(self.state.server_time);
        } else {
            self.waiting_empty_since = None;
        }

        match self.state.phase {
            MatchPhase::Waiting | MatchPhase::MatchEnd => {}
            MatchPhase::Playing => self.simulate(),
            MatchPhase::StageEnd => {
                if self.state.server_time >= self.state.phase_deadline {
                    self.after_stage_pause();
                }
            }
            MatchPhase::StageTransition => {
                if !self.state.stage_start_sent
                    && self.state.server_time >= self.state.stage_start_deadline
                {
                    self.state.stage_start_sent = true;
                    self.broadcast(ServerMsg::StageStart {
                        stage_number: self.state.stage_number,
                        map_name: self.state.current_map().name.clone(),
                    });
                }
                if self.state.server_time >= self.state.phase_deadline {
                    self.state.phase = MatchPhase::Playing;
                    self.state.stage_timer_ms = self.stage_duration_ms;
                }
            }
        }

        if matches!(
            self.state.phase,
            MatchPhase::Playing | MatchPhase::StageEnd | MatchPhase::StageTransition
        ) {
            self.expire_grace_windows();
        }

        self.broadcast_patch();
    }

    /// Simulation pipeline for one playing tick: inputs and movement,
    /// collisions, contact kills, projectiles, then win conditions.
    fn simulate(&mut self) {
        let dt = tick_delta();
        let server_time = self.state.server_time;
        let ids: Vec<Uuid> = self.state.players.keys().copied().collect();

        for id in ids {
            let mut smash_tiles: Vec<(i32, i32)> = Vec::new();
            let mut wants_fire = false;

            {
                let state = &mut self.state;
                let Some(player) = state.players.get_mut(&id) else { continue };
                if !player.connected || !player.alive() {
                    continue;
                }

                // Drain the whole queue, one integration step per frame
                // in arrival order. Ticks without a queued input still
                // integrate drag through a default frame.
                let mut frames: Vec<InputFrame> = Vec::new();
                while let Some(frame) = player.input_queue.pop() {
                    frames.push(frame);
                }
                if frames.is_empty() {
                    frames.push(InputFrame::default());
                }

                let stats = RoleStats::for_role(player.role);
                for frame in frames {
                    if frame.seq > player.last_processed_seq {
                        player.last_processed_seq = frame.seq;
                    }
                    wants_fire |= frame.fire;

                    let (prev_x, prev_y) = (player.x, player.y);
                    apply_movement(
                        &mut player.x,
                        &mut player.y,
                        &mut player.vx,
                        &mut player.vy,
                        &frame,
                        dt,
                        &stats,
                    );
                    update_facing(&mut player.angle, player.vx, player.vy);

                    let result = super::grid::resolve_collisions(
                        &mut player.x,
                        &mut player.y,
                        combat::PLAYER_RADIUS,
                        &state.grid,
                        prev_x,
                        prev_y,
                    );

                    if result.hit_any() {
                        if player.role.is_paran() {
                            // The paran stops dead and smashes what it hit
                            player.vx = 0.0;
                            player.vy = 0.0;
                            smash_tiles.extend(result.hit_tiles.iter().copied().filter(
                                |&(tx, ty)| {
                                    state
                                        .grid
                                        .tile(tx, ty)
                                        .map(|t| t.destructible)
                                        .unwrap_or(false)
                                },
                            ));
                        } else {
                            if result.hit_x {
                                player.vx = 0.0;
                            }
                            if result.hit_y {
                                player.vy = 0.0;
                            }
                        }
                    }
                }
            }

            for tile in smash_tiles {
                if self.state.obstacles.smash(tile) {
                    self.state.grid.clear_tile(tile.0, tile.1);
                }
            }

            if wants_fire {
                let state = &mut self.state;
                if let Some(player) = state.players.get_mut(&id) {
                    let stats = RoleStats::for_role(player.role);
                    let shooter_stats = state.match_stats.entry(id).or_default();
                    if let Some(projectile) =
                        try_fire(player, &stats, server_time, shooter_stats)
                    {
                        state.projectiles.push(projectile);
                    }
                }
            }
        }

        let mut kills = resolve_contact_kills(&mut self.state.players, &mut self.state.match_stats);
        kills.extend(step_projectiles(
            &mut self.state.projectiles,
            &mut self.state.players,
            &mut self.state.match_stats,
            &mut self.state.grid,
            &mut self.state.obstacles,
            server_time,
            dt,
        ));
        for kill in &kills {
            self.broadcast_kill(kill);
        }

        if let Some(winner) = self.state.stage_winner() {
            self.end_stage(winner);
            return;
        }

        self.state.stage_timer_ms -= FIXED_TIMESTEP_MS;
        if self.state.stage_timer_ms <= 0.0 {
            // Surviving the clock is a guardian win
            self.end_stage(Side::Guardians);
        }
    }

    fn broadcast_kill(&self, kill: &KillEvent) {
        self.broadcast(ServerMsg::Kill {
            killer: kill.killer,
            victim: kill.victim,
            killer_role: kill.killer_role,
            victim_role: kill.victim_role,
        });
    }

    fn end_stage(&mut self, winner: Side) {
        match winner {
            Side::Paran => self.state.paran_wins += 1,
            Side::Guardians => self.state.guardian_wins += 1,
        }
        // Inputs queued before the stage was decided must not leak into
        // the next stage (or linger past match end)
        for player in self.state.players.values_mut() {
            player.input_queue.clear();
        }
        self.state.stage_results.push(StageResult {
            stage_number: self.state.stage_number,
            winner,
            map_name: self.state.current_map().name.clone(),
            paran_wins: self.state.paran_wins,
            guardian_wins: self.state.guardian_wins,
            stats: self.state.collect_stats(),
        });

        self.broadcast(ServerMsg::StageEnd {
            stage_winner: winner,
            stage_number: self.state.stage_number,
            paran_wins: self.state.paran_wins,
            guardian_wins: self.state.guardian_wins,
        });

        self.state.phase = MatchPhase::StageEnd;
        self.state.phase_deadline = self.state.server_time + STAGE_END_PAUSE_MS;

        info!(
            room_id = %self.state.id,
            stage = self.state.stage_number,
            winner = ?winner,
            paran_wins = self.state.paran_wins,
            guardian_wins = self.state.guardian_wins,
            "stage ended"
        );
    }

    fn after_stage_pause(&mut self) {
        if self.state.paran_wins >= STAGES_TO_WIN || self.state.guardian_wins >= STAGES_TO_WIN {
            self.finish_match();
        } else {
            self.begin_transition();
        }
    }

    /// Swap arenas for the next stage. The announcement goes out before
    /// any state mutation so clients see the old world one last time,
    /// then the next patch carries per-item removals and additions.
    fn begin_transition(&mut self) {
        self.state.stage_number += 1;
        self.state.map_index = (self.state.map_index + 1) % self.state.catalog.len();

        let map = self.state.current_map();
        self.broadcast(ServerMsg::StageTransition {
            stage_number: self.state.stage_number,
            arena_name: map.display_name.clone(),
            map_name: map.name.clone(),
            paran_wins: self.state.paran_wins,
            guardian_wins: self.state.guardian_wins,
        });

        self.state.projectiles.clear();
        self.state.grid = self.state.current_map().collision_grid();
        self.state.obstacles = ObstacleRegistry::from_grid(&self.state.grid);

        let ids: Vec<Uuid> = self.state.players.keys().copied().collect();
        for id in ids {
            let Some(player) = self.state.players.get(&id) else { continue };
            let requested = self.state.spawn_for_role(player.role);
            let spawn = match find_clear_spawn(&self.state.grid, requested) {
                Some(spawn) => spawn,
                None => {
                    warn!(
                        room_id = %self.state.id,
                        player_id = %id,
                        "stage spawn blocked with no clear neighbor, using as-is"
                    );
                    requested
                }
            };
            if let Some(player) = self.state.players.get_mut(&id) {
                player.reset_for_stage(spawn);
            }
        }

        self.state.phase = MatchPhase::StageTransition;
        self.state.stage_start_sent = false;
        self.state.stage_start_deadline = self.state.server_time + TRANSITION_SETUP_MS;
        self.state.phase_deadline =
            self.state.server_time + TRANSITION_SETUP_MS + TRANSITION_COUNTDOWN_MS;

        info!(
            room_id = %self.state.id,
            stage = self.state.stage_number,
            map = %self.state.current_map().name,
            "stage transition"
        );
    }

    fn finish_match(&mut self) {
        let winner = if self.state.paran_wins > self.state.guardian_wins {
            Side::Paran
        } else {
            Side::Guardians
        };
        let duration = self.state.server_time - self.state.match_start_time.unwrap_or(self.state.server_time);

        self.broadcast(ServerMsg::MatchEnd {
            winner,
            stats: self.state.collect_stats(),
            stage_results: self.state.stage_results.clone(),
            duration,
        });

        self.state.phase = MatchPhase::MatchEnd;
        self.state.phase_deadline = self.state.server_time + MATCH_END_SHUTDOWN_MS;

        info!(
            room_id = %self.state.id,
            winner = ?winner,
            duration_ms = duration,
            "match ended"
        );
    }

    /// Remove players whose reconnection grace expired
    fn expire_grace_windows(&mut self) {
        let expired: Vec<Uuid> = self
            .state
            .players
            .values()
            .filter(|p| matches!(p.reconnect_deadline, Some(deadline) if self.state.server_time >= deadline))
            .map(|p| p.id)
            .collect();

        for id in expired {
            self.remove_player(id, "reconnect_timeout");
        }
    }

    fn broadcast_patch(&mut self) {
        let diff = self.snapshot.diff(
            &self.state.players,
            &self.state.projectiles,
            &self.state.obstacles,
        );
        // Quiet ticks produce no traffic
        if diff.is_empty() {
            return;
        }
        self.broadcast(ServerMsg::Patch {
            tick: self.state.tick,
            server_time: self.state.server_time,
            diff,
        });
    }
}
