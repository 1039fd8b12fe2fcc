// src/playback/supervisor.rs
//! Single owner of the desired state and of the player.
//!
//! Triggers arrive over a channel and the reconciliation tick runs on the
//! same task, so command sequences to the player are never interleaved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};

use super::catalog::{ClipRequest, VideoCatalog};
use super::state::{
    DesiredState, PlaybackAction, PlaybackStateMachine, PlayerObservedState, SupervisorState,
};
use super::PlayerControl;
use crate::config::SupervisorConfig;
use crate::trigger::TriggerEvent;
use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone)]
pub enum SupervisorIntent {
    Trigger(TriggerEvent),
    Shutdown,
}

/// Cloneable sender side; the poll loop and the runtime each hold one.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<SupervisorIntent>,
}

impl SupervisorHandle {
    /// `false` once the supervisor has stopped listening.
    pub fn trigger(&self, event: TriggerEvent) -> bool {
        self.tx.send(SupervisorIntent::Trigger(event)).is_ok()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(SupervisorIntent::Shutdown);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    pub tick_interval: Duration,
    /// Pause between a load and the probe that verifies it.
    pub verify_delay: Duration,
    pub unhealthy_ticks: u32,
    /// Minimum time between two restart cycles.
    pub restart_backoff: Duration,
}

impl From<&SupervisorConfig> for SupervisorSettings {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            verify_delay: Duration::from_millis(config.verify_delay_ms),
            unhealthy_ticks: config.unhealthy_ticks,
            restart_backoff: Duration::from_millis(config.restart_backoff_ms),
        }
    }
}

pub struct PlaybackSupervisor<P: PlayerControl> {
    state: SupervisorState,
    player: P,
    catalog: VideoCatalog,
    settings: SupervisorSettings,
    intent_rx: mpsc::UnboundedReceiver<SupervisorIntent>,
    last_restart: Option<Instant>,
}

impl<P: PlayerControl> PlaybackSupervisor<P> {
    pub fn new(
        player: P,
        catalog: VideoCatalog,
        settings: SupervisorSettings,
    ) -> (Self, SupervisorHandle) {
        let (tx, intent_rx) = mpsc::unbounded_channel();

        let supervisor = Self {
            state: SupervisorState::default(),
            player,
            catalog,
            settings,
            intent_rx,
            last_restart: None,
        };

        (supervisor, SupervisorHandle { tx })
    }

    pub fn desired(&self) -> &DesiredState {
        &self.state.desired
    }

    pub fn state(&self) -> &SupervisorState {
        &self.state
    }

    /// Bring the player up on the idle loop. Failures are left to the tick.
    pub async fn start(&mut self) {
        log_info!("Playback supervisor starting");

        if let Err(e) = self.player.ensure_running().await {
            log_error!("Player failed to start: {}", e);
            self.last_restart = Some(Instant::now());
            return;
        }

        match self.catalog.idle_clip() {
            Some(idle) => self.play_verified(&idle).await,
            None => log_error!("Idle clip '{}' missing from catalog", self.catalog.idle),
        }
    }

    pub async fn handle_trigger(&mut self, event: TriggerEvent) {
        log_info!("Trigger {} (coil {}) at {}", event.action, event.address, event.timestamp);

        let (state, action) =
            PlaybackStateMachine::on_trigger(self.state.clone(), &event.action, &self.catalog);
        self.state = state;
        self.apply(action).await;
    }

    /// One reconciliation tick: probe, step the state machine, repair drift.
    pub async fn reconcile(&mut self) {
        let alive = self.player.is_alive();
        let observed = if alive {
            self.player.probe_state().await
        } else {
            PlayerObservedState::Unknown
        };

        let restart_allowed = self
            .last_restart
            .map_or(true, |at| at.elapsed() >= self.settings.restart_backoff);

        let (state, action) = PlaybackStateMachine::on_probe(
            self.state.clone(),
            observed,
            alive,
            restart_allowed,
            &self.catalog,
            self.settings.unhealthy_ticks,
        );

        if state.unhealthy_ticks > self.state.unhealthy_ticks {
            log_debug!(
                "Player looks unhealthy ({:?}, alive={}), streak {}",
                observed,
                alive,
                state.unhealthy_ticks
            );
        }
        if state.desired != self.state.desired {
            log_info!("Desired state {:?} -> {:?}", self.state.desired, state.desired);
        }

        self.state = state;
        self.apply(action).await;
    }

    pub async fn run(mut self, running: Arc<AtomicBool>) {
        let mut ticker = interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while running.load(Ordering::SeqCst) {
            tokio::select! {
                intent = self.intent_rx.recv() => match intent {
                    Some(SupervisorIntent::Trigger(event)) => self.handle_trigger(event).await,
                    Some(SupervisorIntent::Shutdown) | None => break,
                },
                _ = ticker.tick() => self.reconcile().await,
            }
        }

        self.shutdown().await;
    }

    pub async fn shutdown(&mut self) {
        log_info!("Playback supervisor stopping");
        self.player.terminate().await;
    }

    async fn apply(&mut self, action: PlaybackAction) {
        match action {
            PlaybackAction::Hold => {}
            PlaybackAction::Play(clip) => self.play_verified(&clip).await,
            PlaybackAction::Restart(clip) => self.restart(&clip).await,
            PlaybackAction::Reject { action } => {
                log_warn!("No clip for action '{}', trigger dropped", action);
            }
        }
    }

    /// Load, then check it is really playing. One restart-and-retry at most.
    async fn play_verified(&mut self, clip: &ClipRequest) {
        if self.attempt_play(clip).await {
            return;
        }

        log_warn!("{} did not reach Playing, restarting player once", clip.action);
        self.restart(clip).await;

        sleep(self.settings.verify_delay).await;
        let observed = self.player.probe_state().await;
        if observed != PlayerObservedState::Playing {
            log_error!(
                "{} still not playing after restart ({:?}), leaving it to the tick",
                clip.action,
                observed
            );
        }
    }

    async fn attempt_play(&mut self, clip: &ClipRequest) -> bool {
        if let Err(e) = self.player.load_and_play(clip).await {
            log_warn!("Load of {} failed: {}", clip.action, e);
        }
        sleep(self.settings.verify_delay).await;
        self.player.probe_state().await == PlayerObservedState::Playing
    }

    /// Not verified here; the next reconcile tick probes the outcome.
    async fn restart(&mut self, clip: &ClipRequest) {
        log_warn!("Restarting player for {}", clip.action);
        self.last_restart = Some(Instant::now());

        self.player.terminate().await;
        if let Err(e) = self.player.ensure_running().await {
            log_error!("Player restart failed: {}", e);
            return;
        }
        if let Err(e) = self.player.load_and_play(clip).await {
            log_warn!("Load of {} after restart failed: {}", clip.action, e);
        }
    }
}
