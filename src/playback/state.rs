use serde::{Deserialize, Serialize};

use super::catalog::{ClipRequest, VideoCatalog};

// ----------------------------------------------------------------------------
// STATE - what the supervisor wants on screen, and what the player reports
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DesiredState {
    /// Idle clip, looping.
    Idle,
    /// One-shot (or repeat-annotated) clip for this action.
    Triggered(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerObservedState {
    Unknown,
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorState {
    pub desired: DesiredState,
    /// Consecutive ticks that looked unhealthy for the current desired state.
    pub unhealthy_ticks: u32,
}

impl Default for SupervisorState {
    fn default() -> Self {
        Self {
            desired: DesiredState::Idle,
            unhealthy_ticks: 0,
        }
    }
}

// ----------------------------------------------------------------------------
// ACTIONS - side effects the supervisor must carry out
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackAction {
    Hold,
    /// loadAndPlay, then verify it reached Playing (one restart-and-retry allowed).
    Play(ClipRequest),
    /// terminate + ensureRunning + loadAndPlay, left to later ticks to verify.
    Restart(ClipRequest),
    /// Trigger for an action the catalog does not know. Dropped.
    Reject { action: String },
}

// ----------------------------------------------------------------------------
// STATE MACHINE - Pure functions: (State, input) -> (State, Action)
// ----------------------------------------------------------------------------

pub struct PlaybackStateMachine;

impl PlaybackStateMachine {
    pub fn clip_for(desired: &DesiredState, catalog: &VideoCatalog) -> Option<ClipRequest> {
        match desired {
            DesiredState::Idle => catalog.idle_clip(),
            DesiredState::Triggered(action) => catalog.clip_for(action),
        }
    }

    pub fn on_trigger(
        state: SupervisorState,
        action: &str,
        catalog: &VideoCatalog,
    ) -> (SupervisorState, PlaybackAction) {
        match catalog.clip_for(action) {
            Some(clip) => (
                SupervisorState {
                    desired: DesiredState::Triggered(action.to_string()),
                    unhealthy_ticks: 0,
                },
                PlaybackAction::Play(clip),
            ),
            None => (
                state,
                PlaybackAction::Reject {
                    action: action.to_string(),
                },
            ),
        }
    }

    /// One reconciliation tick.
    ///
    /// `alive == false` means the player process is gone, which is treated as
    /// having already crossed the unhealthy threshold. A restart is only
    /// emitted when `restart_allowed`; otherwise the streak is held so the
    /// restart happens on the first tick it is allowed.
    pub fn on_probe(
        mut state: SupervisorState,
        observed: PlayerObservedState,
        alive: bool,
        restart_allowed: bool,
        catalog: &VideoCatalog,
        unhealthy_limit: u32,
    ) -> (SupervisorState, PlaybackAction) {
        use PlayerObservedState::*;

        if alive {
            let triggered = matches!(state.desired, DesiredState::Triggered(_));
            match observed {
                Stopped if triggered => {
                    state.desired = DesiredState::Idle;
                    state.unhealthy_ticks = 0;
                    let action = catalog
                        .idle_clip()
                        .map(PlaybackAction::Play)
                        .unwrap_or(PlaybackAction::Hold);
                    return (state, action);
                }
                Playing | Paused => {
                    state.unhealthy_ticks = 0;
                    return (state, PlaybackAction::Hold);
                }
                Stopped | Unknown => {
                    state.unhealthy_ticks = state.unhealthy_ticks.saturating_add(1);
                }
            }
        } else {
            state.unhealthy_ticks = state.unhealthy_ticks.max(unhealthy_limit);
        }

        if state.unhealthy_ticks < unhealthy_limit || !restart_allowed {
            return (state, PlaybackAction::Hold);
        }

        state.unhealthy_ticks = 0;
        let action = Self::clip_for(&state.desired, catalog)
            .map(PlaybackAction::Restart)
            .unwrap_or(PlaybackAction::Hold);
        (state, action)
    }
}
