//! WebSocket transport: protocol types and the session handler

pub mod handler;
pub mod protocol;
