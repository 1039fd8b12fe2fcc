mod common;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use coil_kiosk::config::FieldBusConfig;
use coil_kiosk::playback::{PlaybackSupervisor, PlayerObservedState, SupervisorSettings};
use coil_kiosk::poll::{EdgeTracker, PollLoop, PollSettings, TickOutcome};
use coil_kiosk::trigger::{CoilBinding, CoilMap, TriggerGate};
use coil_kiosk::util::io::modbus::ExceptionCode;
use coil_kiosk::util::io::register_client::RegisterClient;

use common::{bits, field_bus, scenario_catalog, spawn_device, FakePlayer, Reply};

fn five_coils() -> CoilMap {
    let bindings = ["A", "B", "C", "D", "E"]
        .iter()
        .enumerate()
        .map(|(address, action)| CoilBinding {
            action: action.to_string(),
            address: address as u16,
        })
        .collect();
    CoilMap::new(bindings).unwrap()
}

fn settings() -> SupervisorSettings {
    SupervisorSettings {
        tick_interval: Duration::from_millis(10),
        verify_delay: Duration::ZERO,
        unhealthy_ticks: 3,
        restart_backoff: Duration::ZERO,
    }
}

/// The supervisor is returned so its channel stays open.
fn poll_loop(config: &FieldBusConfig) -> (PollLoop, PlaybackSupervisor<FakePlayer>) {
    let (supervisor, handle) = PlaybackSupervisor::new(
        FakePlayer::new(PlayerObservedState::Playing),
        scenario_catalog(),
        settings(),
    );
    let tracker = EdgeTracker::new(five_coils(), TriggerGate::new(Duration::from_secs(1)));
    let poll = PollLoop::new(
        RegisterClient::new(config.clone(), 5),
        tracker,
        handle,
        PollSettings::from(config),
    );
    (poll, supervisor)
}

fn events(outcome: TickOutcome) -> Vec<String> {
    match outcome {
        TickOutcome::Read { events } => events.into_iter().map(|e| e.action).collect(),
        other => panic!("expected a read, got {:?}", other),
    }
}

#[tokio::test]
async fn test_first_read_after_reconnect_never_fires() {
    let all_low = bits(&[0, 0, 0, 0, 0]);
    let all_high = bits(&[1, 1, 1, 1, 1]);
    let addr = spawn_device(vec![
        vec![Reply::Coils(all_low.clone()), Reply::Coils(all_low.clone()), Reply::Close],
        vec![
            Reply::Coils(all_high.clone()),
            Reply::Coils(all_high.clone()),
            Reply::Coils(all_high.clone()),
        ],
    ])
    .await;

    let config = field_bus(addr);
    let (mut poll, _supervisor) = poll_loop(&config);

    assert_eq!(poll.tick().await, TickOutcome::Reconnected);
    assert!(events(poll.tick().await).is_empty());

    // Device drops the session; threshold is 1 so the client closes at once
    assert_eq!(poll.tick().await, TickOutcome::Skipped);
    assert!(!poll.client().is_connected());

    assert_eq!(poll.tick().await, TickOutcome::Reconnected);
    assert!(events(poll.tick().await).is_empty());
    assert!(events(poll.tick().await).is_empty());
}

#[tokio::test]
async fn test_coils_high_at_first_connect_fire() {
    let all_high = bits(&[1, 1, 1, 1, 1]);
    let addr = spawn_device(vec![vec![Reply::Coils(all_high.clone()), Reply::Coils(all_high)]]).await;

    let config = field_bus(addr);
    let (mut poll, _supervisor) = poll_loop(&config);

    assert_eq!(poll.tick().await, TickOutcome::Reconnected);
    assert_eq!(events(poll.tick().await), vec!["A", "B", "C", "D", "E"]);
}

#[tokio::test]
async fn test_failures_below_threshold_keep_session() {
    let addr = spawn_device(vec![vec![
        Reply::Coils(bits(&[0, 0, 0, 0, 0])),
        Reply::Exception(ExceptionCode::ServerDeviceBusy),
        Reply::Coils(bits(&[0, 0, 1, 0, 0])),
    ]])
    .await;

    let mut config = field_bus(addr);
    config.reconnect_threshold = 4;
    let (mut poll, _supervisor) = poll_loop(&config);

    assert_eq!(poll.tick().await, TickOutcome::Reconnected);
    assert_eq!(poll.tick().await, TickOutcome::Skipped);
    assert!(poll.client().is_connected());
    assert_eq!(events(poll.tick().await), vec!["C"]);
}

fn refused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

#[tokio::test]
async fn test_unreachable_device_reports_failed_reconnect() {
    let config = field_bus(refused_addr());
    let (mut poll, _supervisor) = poll_loop(&config);

    assert_eq!(poll.tick().await, TickOutcome::ReconnectFailed);
    assert_eq!(poll.tick().await, TickOutcome::ReconnectFailed);
}

#[tokio::test]
async fn test_reconnect_attempts_are_spaced_by_fixed_delay() {
    let config = FieldBusConfig {
        reconnect_delay_ms: 300,
        ..field_bus(refused_addr())
    };
    let (mut poll, _supervisor) = poll_loop(&config);

    let started = Instant::now();
    assert_eq!(poll.tick().await, TickOutcome::ReconnectFailed);
    assert!(started.elapsed() < Duration::from_millis(250));

    let second = Instant::now();
    assert_eq!(poll.tick().await, TickOutcome::ReconnectFailed);
    assert!(second.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_run_exits_when_running_flag_clears() {
    let config = field_bus(refused_addr());
    let (poll, _supervisor) = poll_loop(&config);
    let running = Arc::new(AtomicBool::new(true));

    let task = tokio::spawn(poll.run(running.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!task.is_finished());

    running.store(false, Ordering::SeqCst);
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("poll loop did not stop")
        .unwrap();
}
