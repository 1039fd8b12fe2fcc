use std::time::Duration;

use thiserror::Error;

use crate::util::io::modbus::ExceptionCode;

/// Failure to establish a field-bus session.
#[derive(Error, Debug)]
pub enum ConnError {
    #[error("Field device {addr} unreachable: {reason}")]
    Unreachable { addr: String, reason: String },

    #[error("Protocol error during handshake: {0}")]
    Protocol(String),
}

/// Failure of a single coil read. Any of these means the session may be stale.
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("No live field-bus session")]
    NotConnected,

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Device returned exception {code} for function {function:#04x}")]
    Exception { function: u8, code: ExceptionCode },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to get the player process and its control channel up.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Player binary not found: {0}")]
    BinaryMissing(String),

    #[error("Failed to spawn player: {0}")]
    Spawn(std::io::Error),

    #[error("Control channel did not accept connections within {0:?}")]
    ChannelTimeout(Duration),
}

/// Failure to transmit a command over the control channel.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Control channel not connected")]
    NotConnected,

    #[error("Control channel write timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No coils configured")]
    NoCoils,

    #[error("{count} coils configured, a single read covers at most {max}")]
    TooManyCoils { count: usize, max: u16 },

    #[error("Coil addresses must be contiguous from 0, found {found} at position {position}")]
    NonContiguous { position: usize, found: u16 },

    #[error("Action '{0}' is mapped to more than one coil")]
    DuplicateAction(String),

    #[error("Idle clip '{0}' is not in the video catalog")]
    MissingIdle(String),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

#[derive(Error, Debug)]
pub enum KioskError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, KioskError>;
