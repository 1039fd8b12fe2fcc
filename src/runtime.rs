use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::KioskConfig;
use crate::error::Result;
use crate::playback::{PlaybackSupervisor, SupervisorSettings};
use crate::poll::{EdgeTracker, PollLoop, PollSettings};
use crate::trigger::TriggerGate;
use crate::util::io::player_channel::PlayerChannel;
use crate::util::io::register_client::RegisterClient;
use crate::util::signal::wait_for_shutdown_signal;
use crate::{log_error, log_info, log_warn};

/// Wires the poll loop and the playback supervisor together and owns their
/// lifetime.
pub struct Runtime {
    config: KioskConfig,
    running: Arc<AtomicBool>,
}

impl Runtime {
    pub fn new(config: KioskConfig) -> Result<Self> {
        config.validate()?;

        for (action, path) in config.videos.missing_files() {
            log_warn!("Clip for '{}' not found at {}", action, path.display());
        }

        Ok(Self {
            config,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Runs until SIGINT, SIGTERM or SIGQUIT.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = wait_for_shutdown_signal().await {
                log_error!("Signal handlers unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let config = &self.config;
        let coils = config.coil_map()?;
        log_info!(
            "Coil kiosk starting: {} coils on {}, player {}",
            coils.len(),
            config.field_bus.addr(),
            config.player.binary
        );

        let player = PlayerChannel::new(config.player.clone());
        let (mut supervisor, handle) = PlaybackSupervisor::new(
            player,
            config.videos.clone(),
            SupervisorSettings::from(&config.supervisor),
        );

        let gate = TriggerGate::new(config.triggers.cooldown())
            .with_overrides(config.triggers.overrides());
        let client = RegisterClient::new(config.field_bus.clone(), coils.count());
        let tracker = EdgeTracker::new(coils, gate);
        let poll = PollLoop::new(
            client,
            tracker,
            handle.clone(),
            PollSettings::from(&config.field_bus),
        );

        let supervisor_task = {
            let running = self.running.clone();
            tokio::spawn(async move {
                supervisor.start().await;
                supervisor.run(running).await;
            })
        };
        let poll_task = tokio::spawn(poll.run(self.running.clone()));

        shutdown.await;

        self.running.store(false, Ordering::SeqCst);
        handle.shutdown();

        let deadline = config.shutdown_timeout();
        join_with_timeout("supervisor", supervisor_task, deadline).await;
        join_with_timeout("poll loop", poll_task, deadline).await;

        log_info!("Coil kiosk stopped");
        Ok(())
    }
}

/// Aborting drops whatever the task owned; the player child is killed on drop.
async fn join_with_timeout(name: &str, mut task: JoinHandle<()>, deadline: Duration) {
    match timeout(deadline, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log_error!("{} task ended abnormally: {}", name, e),
        Err(_) => {
            log_warn!("{} did not stop within {:?}, aborting", name, deadline);
            task.abort();
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stuck_task_is_aborted_at_deadline() {
        let held = Arc::new(());
        let task = {
            let held = held.clone();
            tokio::spawn(async move {
                let _held = held;
                std::future::pending::<()>().await;
            })
        };

        let started = std::time::Instant::now();
        join_with_timeout("stuck", task, Duration::from_millis(100)).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        // Abort dropped everything the task owned
        assert_eq!(Arc::strong_count(&held), 1);
    }

    #[tokio::test]
    async fn test_finished_task_joins_immediately() {
        let task = tokio::spawn(async {});
        join_with_timeout("quick", task, Duration::from_secs(5)).await;
    }
}
