mod common;

use std::time::{Duration, Instant};

use coil_kiosk::{KioskConfig, Runtime};

use common::field_bus;

#[tokio::test]
async fn test_shutdown_is_bounded_with_nothing_reachable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let plc = listener.local_addr().unwrap();
    drop(listener);

    let mut config = KioskConfig::default();
    config.field_bus = field_bus(plc);
    config.player.binary = "/nonexistent/vlc".to_string();
    config.shutdown_timeout_ms = 500;

    let runtime = Runtime::new(config).unwrap();
    let started = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        runtime.run_until(tokio::time::sleep(Duration::from_millis(200))),
    )
    .await
    .expect("runtime did not shut down");

    assert!(result.is_ok());
    // Shutdown wait plus two bounded joins, with margin
    assert!(started.elapsed() < Duration::from_millis(200 + 2 * 500 + 500));
}
