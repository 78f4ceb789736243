//! Matchmaking service - manages the queue and room creation

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::game::{GameRoom, RoomEvent, RoomHandle, RoomInbound, RoomRegistry};
use crate::util::time::unix_millis;
use crate::ws::protocol::{Role, ServerMsg};

use super::queue::{MatchmakingQueue, QueuedPlayer};

/// Player connection handle for routing messages
#[derive(Clone)]
pub struct PlayerConnection {
    pub player_id: Uuid,
    /// Channel carrying the session's events toward its current room
    pub inbound_tx: mpsc::Sender<RoomInbound>,
    /// Personal fan-out of the current room's broadcasts
    pub broadcast_tx: broadcast::Sender<ServerMsg>,
}

/// Matchmaking service. Owns the queue and the player-to-room mapping;
/// sessions go through it to reach whichever room they belong to.
pub struct MatchmakingService {
    config: Config,
    queue: Arc<Mutex<MatchmakingQueue>>,
    registry: Arc<RoomRegistry>,
    /// Currently connected sessions
    players: Arc<DashMap<Uuid, PlayerConnection>>,
    /// Player -> room, kept across disconnects so a session can find
    /// its way back during the reconnection grace window
    player_rooms: Arc<DashMap<Uuid, Uuid>>,
}

impl MatchmakingService {
    pub fn new(config: Config, registry: Arc<RoomRegistry>) -> Self {
        Self {
            config,
            queue: Arc::new(Mutex::new(MatchmakingQueue::new())),
            registry,
            players: Arc::new(DashMap::new()),
            player_rooms: Arc::new(DashMap::new()),
        }
    }

    /// Register a session (called when the WebSocket connects).
    /// Returns the personal channels the session reads and writes.
    pub fn register_player(
        &self,
        player_id: Uuid,
    ) -> (mpsc::Sender<RoomInbound>, broadcast::Receiver<ServerMsg>) {
        let (inbound_tx, mut inbound_rx) = mpsc::channel::<RoomInbound>(64);
        let (broadcast_tx, broadcast_rx) = broadcast::channel::<ServerMsg>(256);

        self.players.insert(
            player_id,
            PlayerConnection {
                player_id,
                inbound_tx: inbound_tx.clone(),
                broadcast_tx: broadcast_tx.clone(),
            },
        );

        // Relay session events into whichever room the player is in
        let registry = self.registry.clone();
        let player_rooms = self.player_rooms.clone();
        tokio::spawn(async move {
            while let Some(inbound) = inbound_rx.recv().await {
                let room_id = player_rooms.get(&player_id).map(|r| *r);
                if let Some(handle) = room_id.and_then(|id| registry.get(&id)) {
                    if handle.inbound_tx.send(inbound).await.is_err() {
                        warn!(player_id = %player_id, "room inbound channel closed");
                    }
                }
            }
        });

        // Relay room broadcasts out to the session, following room swaps
        let registry = self.registry.clone();
        let player_rooms = self.player_rooms.clone();
        let players = self.players.clone();
        tokio::spawn(async move {
            let mut current_room_id: Option<Uuid> = None;
            let mut current_rx: Option<broadcast::Receiver<ServerMsg>> = None;

            loop {
                let room_id = player_rooms.get(&player_id).map(|r| *r);
                if room_id != current_room_id {
                    current_room_id = room_id;
                    current_rx =
                        room_id.and_then(|id| registry.get(&id).map(|h| h.broadcast_tx.subscribe()));
                }

                if let Some(ref mut rx) = current_rx {
                    match rx.recv().await {
                        Ok(msg) => {
                            let _ = broadcast_tx.send(msg);
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(player_id = %player_id, lagged = n, "broadcast relay lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            current_room_id = None;
                            current_rx = None;
                        }
                    }
                } else {
                    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
                }

                if !players.contains_key(&player_id) {
                    break;
                }
            }
        });

        (inbound_tx, broadcast_rx)
    }

    /// Unregister a session (called when the WebSocket disconnects).
    /// The player-to-room mapping survives so the grace window works.
    pub async fn unregister_player(&self, player_id: Uuid) {
        self.players.remove(&player_id);
        self.queue.lock().await.dequeue(player_id);
        info!(player_id = %player_id, "player unregistered from matchmaking");
    }

    /// Join the matchmaking queue
    pub async fn join_queue(&self, player: QueuedPlayer) -> Result<(), String> {
        if self.player_rooms.contains_key(&player.player_id) {
            return Err("Already in a room".to_string());
        }

        let player_id = player.player_id;
        let mut queue = self.queue.lock().await;
        queue.enqueue(player);
        info!(player_id = %player_id, queue_size = queue.len(), "player joined matchmaking queue");
        Ok(())
    }

    /// Leave the matchmaking queue
    pub async fn leave_queue(&self, player_id: Uuid) {
        self.queue.lock().await.dequeue(player_id);
    }

    /// The room a player belongs to, if it is still alive
    pub fn room_for(&self, player_id: &Uuid) -> Option<RoomHandle> {
        let room_id = self.player_rooms.get(player_id).map(|r| *r)?;
        self.registry.get(&room_id)
    }

    /// Spin up a room for a formed party and route its members in
    async fn create_room(&self, party: Vec<QueuedPlayer>, assignments: HashMap<Uuid, Role>) {
        let room_id = Uuid::new_v4();
        let seed = rand::random::<u64>();

        let (room, handle) = GameRoom::new(room_id, seed, &self.config);
        self.registry.insert(handle.clone());

        for player in &party {
            self.player_rooms.insert(player.player_id, room_id);
        }

        // Drop a player's room mapping the moment the room removes
        // their slot (consented leave, grace expiry). Otherwise they
        // stay locked out of matchmaking until the room terminates.
        let mut room_rx = handle.broadcast_tx.subscribe();
        let player_rooms = self.player_rooms.clone();
        tokio::spawn(async move {
            loop {
                match room_rx.recv().await {
                    Ok(ServerMsg::PlayerLeft { player_id, .. }) => {
                        player_rooms.remove_if(&player_id, |_, mapped| *mapped == room_id);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(room_id = %room_id, lagged = n, "room event relay lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let longest_wait_ms = party
            .iter()
            .map(|p| p.wait_time().as_millis() as u64)
            .max()
            .unwrap_or(0);
        info!(
            room_id = %room_id,
            player_count = party.len(),
            longest_wait_ms,
            "created room for party"
        );

        let registry = self.registry.clone();
        let player_rooms = self.player_rooms.clone();
        let member_ids: Vec<Uuid> = party.iter().map(|p| p.player_id).collect();
        tokio::spawn(async move {
            room.run().await;
            registry.remove(&room_id);
            for id in member_ids {
                player_rooms.remove(&id);
            }
            info!(room_id = %room_id, "room removed from registry");
        });

        for player in party {
            let join = RoomInbound {
                player_id: player.player_id,
                event: RoomEvent::Join {
                    name: player.name,
                    role: assignments.get(&player.player_id).copied(),
                    from_lobby: true,
                    role_assignments: Some(assignments.clone()),
                },
                received_at: unix_millis(),
            };
            if handle.inbound_tx.send(join).await.is_err() {
                error!(player_id = %player.player_id, "failed to route player into room");
            }
        }
    }

    /// Run the matchmaking service (periodic queue processing)
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(500));

        loop {
            interval.tick().await;

            // Collect full parties under the lock, create rooms outside it
            let mut parties = Vec::new();
            {
                let mut queue = self.queue.lock().await;
                while let Some(party) = queue.try_form_party() {
                    parties.push(party);
                }
            }

            for (party, assignments) in parties {
                self.create_room(party, assignments).await;
            }
        }
    }

    pub async fn queue_size(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_in_queue(&self, player_id: &Uuid) -> bool {
        self.queue.lock().await.contains(player_id)
    }
}

impl Clone for MatchmakingService {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            queue: self.queue.clone(),
            registry: self.registry.clone(),
            players: self.players.clone(),
            player_rooms: self.player_rooms.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".into(),
            client_origin: "*".into(),
            reconnect_grace_secs: 60,
            stage_duration_ms: 120_000.0,
            simulate_latency_ms: 0,
        }
    }

    fn party_of_three() -> (Vec<QueuedPlayer>, HashMap<Uuid, Role>, [Uuid; 3]) {
        let ids = [Uuid::from_u128(1), Uuid::from_u128(2), Uuid::from_u128(3)];
        let party: Vec<QueuedPlayer> = ids
            .iter()
            .map(|&id| QueuedPlayer::new(id, None, None))
            .collect();
        let assignments = ids.iter().zip(Role::ALL).map(|(&id, role)| (id, role)).collect();
        (party, assignments, ids)
    }

    async fn settle() {
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn consented_leave_frees_the_player_for_requeue() {
        let service = MatchmakingService::new(test_config(), Arc::new(RoomRegistry::new()));
        let (party, assignments, ids) = party_of_three();
        service.create_room(party, assignments).await;

        let handle = service.room_for(&ids[0]).expect("player mapped to room");
        settle().await;

        handle
            .inbound_tx
            .send(RoomInbound {
                player_id: ids[0],
                event: RoomEvent::Leave { consented: true },
                received_at: unix_millis(),
            })
            .await
            .unwrap();
        settle().await;

        // The mapping is gone and the queue accepts them again
        assert!(service.room_for(&ids[0]).is_none());
        assert!(service
            .join_queue(QueuedPlayer::new(ids[0], None, None))
            .await
            .is_ok());

        // Players still in the room keep their mapping
        assert!(service.room_for(&ids[1]).is_some());
    }

    #[tokio::test]
    async fn mapping_survives_plain_disconnect() {
        let service = MatchmakingService::new(test_config(), Arc::new(RoomRegistry::new()));
        let (party, assignments, ids) = party_of_three();
        service.create_room(party, assignments).await;

        let handle = service.room_for(&ids[2]).expect("player mapped to room");
        settle().await;

        // Dropped socket mid-match: the slot is held, so the mapping
        // must stay for grace-window rejoin routing
        handle
            .inbound_tx
            .send(RoomInbound {
                player_id: ids[2],
                event: RoomEvent::Leave { consented: false },
                received_at: unix_millis(),
            })
            .await
            .unwrap();
        settle().await;

        assert!(service.room_for(&ids[2]).is_some());
        assert!(service
            .join_queue(QueuedPlayer::new(ids[2], None, None))
            .await
            .is_err());
    }
}
