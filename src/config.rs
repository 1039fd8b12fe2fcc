// src/config.rs
// Kiosk configuration, loaded from YAML

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::playback::catalog::VideoCatalog;
use crate::trigger::{CoilBinding, CoilMap};
use crate::{log_info, log_warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskConfig {
    pub field_bus: FieldBusConfig,
    pub triggers: TriggerConfig,
    pub coils: Vec<CoilBinding>,
    pub videos: VideoCatalog,
    pub player: PlayerConfig,
    pub supervisor: SupervisorConfig,
    pub shutdown_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldBusConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub poll_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    /// Consecutive failed reads before the session is closed and reopened.
    pub reconnect_threshold: u32,
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub cooldown_ms: u64,
    pub cooldown_overrides: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub binary: String,
    /// `{host}` and `{port}` are replaced with the control channel address.
    pub args: Vec<String>,
    pub control_host: String,
    pub control_port: u16,
    pub launch_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    /// Consecutive command failures before the control connection is dropped.
    pub failure_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub tick_interval_ms: u64,
    pub verify_delay_ms: u64,
    pub unhealthy_ticks: u32,
    pub restart_backoff_ms: u64,
}

impl Default for KioskConfig {
    fn default() -> Self {
        let actions = [
            "Process_step_1",
            "Guide_steps",
            "Warning",
            "Process_step_2",
            "Process_step_3",
        ];

        let coils = actions
            .iter()
            .enumerate()
            .map(|(address, action)| CoilBinding {
                action: action.to_string(),
                address: address as u16,
            })
            .collect();

        let videos = actions
            .iter()
            .fold(VideoCatalog::new("idle"), |catalog, action| {
                catalog.with_clip(*action, format!("{}.mp4", action), *action == "Warning")
            })
            .with_clip("idle", "Guide_steps.mp4", true);

        Self {
            field_bus: FieldBusConfig::default(),
            triggers: TriggerConfig::default(),
            coils,
            videos,
            player: PlayerConfig::default(),
            supervisor: SupervisorConfig::default(),
            shutdown_timeout_ms: 2000,
        }
    }
}

impl Default for FieldBusConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            port: 502,
            unit_id: 1,
            poll_interval_ms: 100,
            connect_timeout_ms: 2000,
            read_timeout_ms: 2000,
            reconnect_threshold: 4,
            reconnect_delay_ms: 1000,
        }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 5000,
            cooldown_overrides: HashMap::new(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        let args = [
            "-I", "dummy",
            "--extraintf", "oldrc",
            "--rc-host", "{host}:{port}",
            "--no-audio",
            "--fullscreen",
            "--video-on-top",
            "--no-video-title-show",
            "--no-video-deco",
            "--no-qt-fs-controller",
            "--quiet",
        ];

        Self {
            binary: "vlc".to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            control_host: "127.0.0.1".to_string(),
            control_port: 4212,
            launch_timeout_ms: 8000,
            command_timeout_ms: 500,
            stop_timeout_ms: 1000,
            failure_threshold: 3,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            verify_delay_ms: 250,
            unhealthy_ticks: 3,
            restart_backoff_ms: 2000,
        }
    }
}

impl FieldBusConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl TriggerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn overrides(&self) -> HashMap<String, Duration> {
        self.cooldown_overrides
            .iter()
            .map(|(action, ms)| (action.clone(), Duration::from_millis(*ms)))
            .collect()
    }
}

impl PlayerConfig {
    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.control_host, self.control_port)
    }

    pub fn render_args(&self) -> Vec<String> {
        let port = self.control_port.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{host}", &self.control_host).replace("{port}", &port))
            .collect()
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl KioskConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: KioskConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Reads `path` if it exists, otherwise the reference deployment defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            log_info!("Loading configuration from {}", path.display());
            Self::load(path)
        } else {
            log_warn!("{} not found, using built-in defaults", path.display());
            Ok(Self::default())
        }
    }

    /// First CLI argument, then `KIOSK_CONFIG`, then `kiosk.yml`.
    pub fn resolve_path(args: &[String]) -> PathBuf {
        args.get(1)
            .cloned()
            .or_else(|| std::env::var("KIOSK_CONFIG").ok())
            .unwrap_or_else(|| "kiosk.yml".to_string())
            .into()
    }

    pub fn coil_map(&self) -> std::result::Result<CoilMap, ConfigError> {
        CoilMap::new(self.coils.clone())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let coils = self.coil_map()?;

        if !self.videos.contains(&self.videos.idle) {
            return Err(ConfigError::MissingIdle(self.videos.idle.clone()));
        }

        let nonzero = [
            ("field_bus.poll_interval_ms", self.field_bus.poll_interval_ms),
            ("field_bus.read_timeout_ms", self.field_bus.read_timeout_ms),
            ("field_bus.reconnect_threshold", self.field_bus.reconnect_threshold as u64),
            ("supervisor.tick_interval_ms", self.supervisor.tick_interval_ms),
            ("supervisor.unhealthy_ticks", self.supervisor.unhealthy_ticks as u64),
            ("player.command_timeout_ms", self.player.command_timeout_ms),
            ("player.failure_threshold", self.player.failure_threshold as u64),
        ];
        if let Some((field, _)) = nonzero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero { field });
        }

        // Dispatch drops these at runtime; worth knowing about at startup
        for binding in coils.iter() {
            if !self.videos.contains(&binding.action) {
                log_warn!(
                    "Coil {} action '{}' has no clip in the catalog",
                    binding.address,
                    binding.action
                );
            }
        }

        Ok(())
    }
}
