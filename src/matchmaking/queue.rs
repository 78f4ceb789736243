//! Matchmaking queue implementation

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::ws::protocol::Role;

/// Every match is exactly one paran and two guardians
pub const PARTY_SIZE: usize = 3;

/// Player in the matchmaking queue
#[derive(Debug, Clone)]
pub struct QueuedPlayer {
    pub player_id: Uuid,
    pub name: Option<String>,
    /// Preferred role; None takes whatever is left
    pub role: Option<Role>,
    pub queued_at: Instant,
}

impl QueuedPlayer {
    pub fn new(player_id: Uuid, name: Option<String>, role: Option<Role>) -> Self {
        Self {
            player_id,
            name,
            role,
            queued_at: Instant::now(),
        }
    }

    /// How long this player has been waiting
    pub fn wait_time(&self) -> Duration {
        self.queued_at.elapsed()
    }
}

/// FIFO queue that forms three-player parties with a full role cover.
/// Role preferences are granted first come first served; whoever asked
/// for a taken role falls back to a free one.
#[derive(Default)]
pub struct MatchmakingQueue {
    queue: VecDeque<QueuedPlayer>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a player to the queue; re-queueing moves them to the back
    pub fn enqueue(&mut self, player: QueuedPlayer) {
        self.queue.retain(|p| p.player_id != player.player_id);
        self.queue.push_back(player);
    }

    /// Remove a player from the queue
    pub fn dequeue(&mut self, player_id: Uuid) -> Option<QueuedPlayer> {
        let pos = self.queue.iter().position(|p| p.player_id == player_id)?;
        self.queue.remove(pos)
    }

    pub fn contains(&self, player_id: &Uuid) -> bool {
        self.queue.iter().any(|p| &p.player_id == player_id)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Pop a full party off the queue, with the role each member will
    /// play. Returns None until three players are waiting.
    pub fn try_form_party(&mut self) -> Option<(Vec<QueuedPlayer>, HashMap<Uuid, Role>)> {
        if self.queue.len() < PARTY_SIZE {
            return None;
        }
        let party: Vec<QueuedPlayer> = self.queue.drain(..PARTY_SIZE).collect();
        let assignments = assign_roles(&party);
        Some((party, assignments))
    }
}

/// Grant distinct explicit requests in queue order, then hand out the
/// remaining roles in queue order.
fn assign_roles(party: &[QueuedPlayer]) -> HashMap<Uuid, Role> {
    let mut assignments = HashMap::new();
    let mut taken: Vec<Role> = Vec::new();

    for player in party {
        if let Some(role) = player.role {
            if !taken.contains(&role) {
                assignments.insert(player.player_id, role);
                taken.push(role);
            }
        }
    }
    for player in party {
        if assignments.contains_key(&player.player_id) {
            continue;
        }
        if let Some(role) = Role::ALL.into_iter().find(|r| !taken.contains(r)) {
            assignments.insert(player.player_id, role);
            taken.push(role);
        }
    }

    assignments
}
