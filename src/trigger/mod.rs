//! Turning raw coil snapshots into discrete trigger events.

pub mod edge;
pub mod gate;

use std::ops::Index;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::util::io::modbus::MAX_READ_COILS;

pub use edge::{detect_falling_edges, detect_rising_edges};
pub use gate::TriggerGate;

/// One configured point: which action fires when the coil at `address` goes high.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoilBinding {
    pub action: String,
    pub address: u16,
}

/// Ordered action → address mapping. Addresses are contiguous from 0 so the
/// whole map is covered by a single bulk read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoilMap {
    bindings: Vec<CoilBinding>,
}

impl CoilMap {
    pub fn new(mut bindings: Vec<CoilBinding>) -> Result<Self, ConfigError> {
        if bindings.is_empty() {
            return Err(ConfigError::NoCoils);
        }
        if bindings.len() > MAX_READ_COILS as usize {
            return Err(ConfigError::TooManyCoils {
                count: bindings.len(),
                max: MAX_READ_COILS,
            });
        }

        bindings.sort_by_key(|b| b.address);

        for (position, binding) in bindings.iter().enumerate() {
            if binding.address as usize != position {
                return Err(ConfigError::NonContiguous {
                    position,
                    found: binding.address,
                });
            }
            if bindings[..position].iter().any(|b| b.action == binding.action) {
                return Err(ConfigError::DuplicateAction(binding.action.clone()));
            }
        }

        Ok(Self { bindings })
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Number of points to request per read.
    pub fn count(&self) -> u16 {
        self.bindings.len() as u16
    }

    pub fn action(&self, index: usize) -> Option<&str> {
        self.bindings.get(index).map(|b| b.action.as_str())
    }

    pub fn address(&self, index: usize) -> Option<u16> {
        self.bindings.get(index).map(|b| b.address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CoilBinding> {
        self.bindings.iter()
    }
}

/// Coil states from a single read, positionally aligned with the [`CoilMap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot(Vec<bool>);

impl Snapshot {
    pub fn new(points: Vec<bool>) -> Self {
        Self(points)
    }

    pub fn all_low(len: usize) -> Self {
        Self(vec![false; len])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn points(&self) -> &[bool] {
        &self.0
    }
}

impl From<Vec<bool>> for Snapshot {
    fn from(points: Vec<bool>) -> Self {
        Self(points)
    }
}

impl Index<usize> for Snapshot {
    type Output = bool;

    fn index(&self, index: usize) -> &bool {
        &self.0[index]
    }
}

/// A rising edge that made it through the cooldown gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub action: String,
    pub address: u16,
    pub timestamp: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn new(action: impl Into<String>, address: u16) -> Self {
        Self {
            action: action.into(),
            address,
            timestamp: Utc::now(),
        }
    }
}
