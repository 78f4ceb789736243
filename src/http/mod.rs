//! HTTP surface: router, health, and matchmaking entry

pub mod routes;

pub use routes::build_router;
