// src/playback/mod.rs
//! What is on screen: the clip catalog, the desired/observed state machine,
//! and the supervisor that reconciles the two.

pub mod catalog;
pub mod state;
pub mod supervisor;

use async_trait::async_trait;

use crate::error::{CommandError, LaunchError};

pub use catalog::{ClipRequest, VideoCatalog, VideoEntry};
pub use state::{DesiredState, PlaybackAction, PlaybackStateMachine, PlayerObservedState};
pub use supervisor::{PlaybackSupervisor, SupervisorHandle, SupervisorSettings};

/// The external player as the supervisor sees it.
///
/// Every call is idempotent and safe to retry. Only one caller ever holds
/// the implementor, so command sequences cannot interleave.
#[async_trait]
pub trait PlayerControl: Send {
    /// Spawn the player if it is not alive and wait for its control channel.
    async fn ensure_running(&mut self) -> Result<(), LaunchError>;

    /// Transmit the full load sequence for `clip`. Does not confirm playback.
    async fn load_and_play(&mut self, clip: &ClipRequest) -> Result<(), CommandError>;

    /// Never fails; anything unreadable is `Unknown`.
    async fn probe_state(&mut self) -> PlayerObservedState;

    /// Graceful stop with a bounded wait, then kill.
    async fn terminate(&mut self);

    fn is_alive(&mut self) -> bool;
}
