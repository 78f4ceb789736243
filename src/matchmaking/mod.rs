//! Matchmaking: queueing players and forming three-role parties

pub mod queue;
pub mod service;

pub use service::MatchmakingService;
