// src/poll.rs
//! Poll loop: read coils, detect rising edges, gate them, hand them off

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::{interval, sleep, MissedTickBehavior};

use crate::config::FieldBusConfig;
use crate::playback::SupervisorHandle;
use crate::trigger::{
    detect_falling_edges, detect_rising_edges, CoilMap, Snapshot, TriggerEvent, TriggerGate,
};
use crate::util::io::register_client::RegisterClient;
use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Baseline {
    Known(Snapshot),
    /// Session was re-established; the next snapshot is adopted without edges.
    Unknown,
}

/// Edge detection plus cooldown, with the previous snapshot as state.
pub struct EdgeTracker {
    coils: CoilMap,
    gate: TriggerGate,
    baseline: Baseline,
}

impl EdgeTracker {
    /// Starts from all-low, so coils already high at startup fire once.
    pub fn new(coils: CoilMap, gate: TriggerGate) -> Self {
        let baseline = Baseline::Known(Snapshot::all_low(coils.len()));
        Self {
            coils,
            gate,
            baseline,
        }
    }

    pub fn coil_count(&self) -> u16 {
        self.coils.count()
    }

    pub fn reset_baseline(&mut self) {
        self.baseline = Baseline::Unknown;
    }

    pub fn observe(&mut self, snapshot: &Snapshot) -> Vec<TriggerEvent> {
        self.observe_at(snapshot, Instant::now())
    }

    pub fn observe_at(&mut self, snapshot: &Snapshot, now: Instant) -> Vec<TriggerEvent> {
        if snapshot.len() != self.coils.len() {
            log_warn!(
                "Snapshot has {} points, coil map has {}; ignoring read",
                snapshot.len(),
                self.coils.len()
            );
            return Vec::new();
        }

        let previous = match mem::replace(&mut self.baseline, Baseline::Known(snapshot.clone())) {
            Baseline::Known(previous) => previous,
            Baseline::Unknown => {
                log_info!("Adopted post-reconnect snapshot {:?} as baseline", snapshot.points());
                return Vec::new();
            }
        };

        for index in detect_falling_edges(&previous, snapshot) {
            if let Some(action) = self.coils.action(index) {
                log_debug!("Coil {} ({}) released", index, action);
            }
        }

        let mut events = Vec::new();
        for index in detect_rising_edges(&previous, snapshot) {
            let (Some(action), Some(address)) = (self.coils.action(index), self.coils.address(index))
            else {
                continue;
            };

            if self.gate.can_fire_at(action, now) {
                events.push(TriggerEvent::new(action, address));
            } else {
                log_debug!("{} suppressed by cooldown", action);
            }
        }
        events
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub unit_id: u8,
    pub poll_interval: Duration,
    pub reconnect_threshold: u32,
    pub reconnect_delay: Duration,
}

impl From<&FieldBusConfig> for PollSettings {
    fn from(config: &FieldBusConfig) -> Self {
        Self {
            unit_id: config.unit_id,
            poll_interval: config.poll_interval(),
            reconnect_threshold: config.reconnect_threshold,
            reconnect_delay: config.reconnect_delay(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Read { events: Vec<TriggerEvent> },
    /// Read failed; nothing forwarded this tick.
    Skipped,
    Reconnected,
    ReconnectFailed,
}

pub struct PollLoop {
    client: RegisterClient,
    tracker: EdgeTracker,
    supervisor: SupervisorHandle,
    settings: PollSettings,
    ever_connected: bool,
    connect_attempts: u32,
}

impl PollLoop {
    pub fn new(
        client: RegisterClient,
        tracker: EdgeTracker,
        supervisor: SupervisorHandle,
        settings: PollSettings,
    ) -> Self {
        Self {
            client,
            tracker,
            supervisor,
            settings,
            ever_connected: false,
            connect_attempts: 0,
        }
    }

    pub fn client(&self) -> &RegisterClient {
        &self.client
    }

    pub async fn tick(&mut self) -> TickOutcome {
        if !self.client.is_connected() {
            return self.reconnect().await;
        }

        let count = self.tracker.coil_count();
        match self.client.read_points(0, count, self.settings.unit_id).await {
            Ok(snapshot) => {
                let events = self.tracker.observe(&snapshot);
                for event in &events {
                    if !self.supervisor.trigger(event.clone()) {
                        log_warn!("Supervisor gone, {} not delivered", event.action);
                    }
                }
                TickOutcome::Read { events }
            }
            Err(e) => {
                let streak = self.client.failure_streak();
                if streak >= self.settings.reconnect_threshold {
                    log_warn!("{} failed reads in a row (last: {}), reconnecting", streak, e);
                    self.client.close();
                }
                TickOutcome::Skipped
            }
        }
    }

    async fn reconnect(&mut self) -> TickOutcome {
        if self.connect_attempts > 0 {
            sleep(self.settings.reconnect_delay).await;
        }
        self.connect_attempts = self.connect_attempts.saturating_add(1);

        match self.client.connect().await {
            Ok(()) => {
                if self.ever_connected {
                    self.tracker.reset_baseline();
                }
                self.ever_connected = true;
                TickOutcome::Reconnected
            }
            Err(e) => {
                log_warn!("Field-bus connect failed: {}", e);
                TickOutcome::ReconnectFailed
            }
        }
    }

    pub async fn run(mut self, running: Arc<AtomicBool>) {
        log_info!("Poll loop starting ({:?} interval)", self.settings.poll_interval);

        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while running.load(Ordering::SeqCst) {
            ticker.tick().await;
            if !running.load(Ordering::SeqCst) {
                break;
            }
            self.tick().await;
        }

        self.client.close();
        log_info!("Poll loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::CoilBinding;

    fn tracker(cooldown: Duration) -> EdgeTracker {
        let coils = CoilMap::new(vec![
            CoilBinding { action: "A".to_string(), address: 0 },
            CoilBinding { action: "B".to_string(), address: 1 },
        ])
        .unwrap();
        EdgeTracker::new(coils, TriggerGate::new(cooldown))
    }

    fn snap(a: bool, b: bool) -> Snapshot {
        Snapshot::new(vec![a, b])
    }

    #[test]
    fn test_coil_high_at_startup_fires_once() {
        let mut tracker = tracker(Duration::from_secs(1));
        let events = tracker.observe(&snap(true, false));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, "A");
        assert!(tracker.observe(&snap(true, false)).is_empty());
    }

    #[test]
    fn test_unknown_baseline_swallows_first_snapshot() {
        let mut tracker = tracker(Duration::from_secs(1));
        tracker.reset_baseline();
        assert!(tracker.observe(&snap(true, true)).is_empty());
        assert!(tracker.observe(&snap(true, true)).is_empty());
    }

    #[test]
    fn test_rising_edge_inside_cooldown_is_dropped() {
        let mut tracker = tracker(Duration::from_secs(1));
        let t0 = Instant::now();

        assert_eq!(tracker.observe_at(&snap(true, false), t0).len(), 1);
        assert!(tracker.observe_at(&snap(false, false), t0 + Duration::from_millis(100)).is_empty());
        assert!(tracker.observe_at(&snap(true, false), t0 + Duration::from_millis(200)).is_empty());
        assert!(tracker.observe_at(&snap(false, false), t0 + Duration::from_millis(1100)).is_empty());
        assert_eq!(tracker.observe_at(&snap(true, false), t0 + Duration::from_millis(1200)).len(), 1);
    }

    #[test]
    fn test_wrong_length_snapshot_is_ignored() {
        let mut tracker = tracker(Duration::from_secs(1));
        assert!(tracker.observe(&Snapshot::new(vec![true])).is_empty());
        // Baseline untouched, so the real edge still fires
        assert_eq!(tracker.observe(&snap(true, false)).len(), 1);
    }
}
