//! Game simulation modules

pub mod combat;
pub mod grid;
pub mod input;
pub mod map;
pub mod obstacles;
pub mod physics;
pub mod player;
pub mod role;
pub mod room;
pub mod snapshot;

pub use room::{GameRoom, RoomHandle, RoomRegistry};

use std::collections::HashMap;
use uuid::Uuid;

use crate::ws::protocol::Role;
use input::InputFrame;

/// An event from a client session, routed to the owning room's task
#[derive(Debug, Clone)]
pub struct RoomInbound {
    pub player_id: Uuid,
    pub event: RoomEvent,
    pub received_at: u64,
}

/// What a client session can ask of a room. Inputs arrive pre-validated
/// (see `input::validate_input`); everything here is already trusted in
/// shape, only game rules remain to be checked.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    Join {
        name: Option<String>,
        role: Option<Role>,
        from_lobby: bool,
        role_assignments: Option<HashMap<Uuid, Role>>,
    },
    Input(InputFrame),
    /// `consented` distinguishes an explicit leave from a dropped socket
    Leave { consented: bool },
    Reconnect,
}
