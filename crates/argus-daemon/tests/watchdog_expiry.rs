//! Watchdog expiry end to end: silence becomes a CREATE in the vector, the
//! next snapshot enqueues it, and the worker dispatches it.

mod common;

use std::time::Duration;

use argus_core::alert::{AlertStatus, PRIORITY_WATCHDOG};
use argus_core::watchdog::WatchdogConfig;
use argus_daemon::watchdog::WATCHDOG_FINGERPRINT;

use common::{Harness, HarnessOptions};

fn fast_watchdog() -> WatchdogConfig {
    WatchdogConfig {
        timeout: Duration::from_secs(1),
        normal_grace_period: Duration::ZERO,
        crash_recovery_grace_period: Duration::ZERO,
        send_to_noc: true,
        payload: "watchdog-payload".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_silent_watchdog_reaches_noc() {
    let harness = Harness::start(HarnessOptions {
        watchdog: fast_watchdog(),
        ..Default::default()
    })
    .await;

    harness.watchdog.start();

    // No heartbeat ever arrives; the timer fires at the timeout.
    tokio::time::sleep(Duration::from_millis(1300)).await;

    let entry = harness.vector.get(WATCHDOG_FINGERPRINT).unwrap();
    assert_eq!(entry.status, AlertStatus::Create);
    assert_eq!(entry.priority, PRIORITY_WATCHDOG);

    harness.coordinator.snapshot_tick();
    harness.settle().await;

    let messages = harness.noc.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].priority, PRIORITY_WATCHDOG);
    assert_eq!(messages[0].payload, "watchdog-payload");
    harness.stop().await;
}

#[tokio::test]
async fn test_heartbeats_keep_watchdog_quiet() {
    let harness = Harness::start(HarnessOptions {
        watchdog: fast_watchdog(),
        ..Default::default()
    })
    .await;

    harness.watchdog.start();

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(400)).await;
        harness.watchdog.record_heartbeat();
    }

    let entry = harness.vector.get(WATCHDOG_FINGERPRINT).unwrap();
    assert_eq!(entry.status, AlertStatus::Ignore);

    harness.coordinator.snapshot_tick();
    harness.settle().await;
    assert!(harness.noc.messages().is_empty());
    harness.stop().await;
}
