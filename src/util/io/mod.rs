// src/util/io/mod.rs
//! Network peers: the field device and the player's control channel.

pub mod modbus;
pub mod player_channel;
pub mod register_client;

use serde::{Deserialize, Serialize};

/// Health of one owned connection.
///
/// Starts `Disconnected`, becomes `Connected` on a good handshake, and moves
/// to `Degraded(streak)` while operations fail. The owner closes the
/// connection once the streak crosses its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Degraded(u32),
}

impl ConnectionState {
    pub fn failure_streak(&self) -> u32 {
        match self {
            ConnectionState::Degraded(streak) => *streak,
            _ => 0,
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, ConnectionState::Disconnected)
    }
}
