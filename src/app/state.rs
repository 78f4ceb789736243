//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::RoomRegistry;
use crate::matchmaking::MatchmakingService;
use crate::util::rate_limit::{create_limiter, Limiter, MATCHMAKING_RATE_LIMIT};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub matchmaking: Arc<MatchmakingService>,
    pub room_registry: Arc<RoomRegistry>,
    /// Server-wide throttle on queue joins
    pub matchmaking_limiter: Arc<Limiter>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let room_registry = Arc::new(RoomRegistry::new());
        let matchmaking = Arc::new(MatchmakingService::new(config.clone(), room_registry.clone()));

        Self {
            config: Arc::new(config),
            matchmaking,
            room_registry,
            matchmaking_limiter: create_limiter(MATCHMAKING_RATE_LIMIT),
        }
    }
}
