use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-action cooldown filter.
///
/// The window is measured from the last *successful* fire of the same action.
/// Different actions never debounce each other.
#[derive(Debug, Clone)]
pub struct TriggerGate {
    cooldown: Duration,
    overrides: HashMap<String, Duration>,
    last_fired: HashMap<String, Instant>,
}

impl TriggerGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            overrides: HashMap::new(),
            last_fired: HashMap::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, Duration>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn cooldown_for(&self, action: &str) -> Duration {
        self.overrides.get(action).copied().unwrap_or(self.cooldown)
    }

    pub fn can_fire(&mut self, action: &str) -> bool {
        self.can_fire_at(action, Instant::now())
    }

    /// Records `now` as the fire time when the action is allowed.
    pub fn can_fire_at(&mut self, action: &str, now: Instant) -> bool {
        let window = self.cooldown_for(action);

        if let Some(last) = self.last_fired.get(action) {
            if now.saturating_duration_since(*last) < window {
                return false;
            }
        }

        self.last_fired.insert(action.to_string(), now);
        true
    }
}
