//! End-to-end pipeline tests: push ingress through snapshot to NOC
//! dispatch, over the real HTTP router where the ingress contract matters.

mod common;

use std::sync::Arc;
use std::time::Duration;

use argus_core::alert::{fingerprint_labels, AlertStatus, PushAlert};
use argus_daemon::http::{self, AppState};
use argus_daemon::k8s::{KSM_FINGERPRINT, PROMETHEUS_FINGERPRINT};
use chrono::Utc;

use common::{healthy_pod, Harness, HarnessOptions, KSM_SELECTOR, PROM_SELECTOR};

fn push_alert(name: &str, platform: &str, priority: &str) -> PushAlert {
    PushAlert {
        status: Some("firing".to_string()),
        send_to_noc: None,
        suppress_window: None,
        labels: [
            ("alertname".to_string(), name.to_string()),
            ("platform".to_string(), platform.to_string()),
            ("priority".to_string(), priority.to_string()),
        ]
        .into(),
        annotations: Default::default(),
        starts_at: Utc::now(),
        ends_at: None,
        generator_url: None,
    }
}

async fn serve(harness: &Harness) -> String {
    let state = Arc::new(AppState {
        coordinator: Arc::clone(&harness.coordinator),
        vector: Arc::clone(&harness.vector),
        watchdog: Arc::clone(&harness.watchdog),
        k8s: Arc::clone(&harness.k8s),
        queue: Arc::clone(&harness.queue),
        metrics: Arc::clone(&harness.metrics),
    });
    let app = http::router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_foreign_platform_is_filtered_via_http() {
    let harness = Harness::start(HarnessOptions::default()).await;
    let base = serve(&harness).await;
    let client = reqwest::Client::new();

    let body = serde_json::json!([{
        "status": "firing",
        "labels": {"alertname": "X", "platform": "other"},
        "startsAt": "2024-01-01T00:00:00Z"
    }]);
    let response = client
        .post(format!("{base}/api/v2/alerts"))
        .header("X-Correlation-ID", "push-itest001")
        .json(&body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("X-Correlation-ID")
            .and_then(|v| v.to_str().ok()),
        Some("push-itest001")
    );
    assert!(response.text().await.unwrap().is_empty());

    let snapshot = harness.metrics.snapshot();
    assert_eq!(snapshot.received, 1);
    assert_eq!(snapshot.filtered, 1);
    assert!(harness.vector.is_empty());
    harness.stop().await;
}

#[tokio::test]
async fn test_invalid_push_body_returns_400() {
    let harness = Harness::start(HarnessOptions::default()).await;
    let base = serve(&harness).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/api/v2/alerts"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    assert_eq!(harness.metrics.snapshot().push_rejected, 1);
    assert!(harness.vector.is_empty());
    harness.stop().await;
}

#[tokio::test]
async fn test_create_dispatched_once_then_suppressed() {
    let harness = Harness::start(HarnessOptions {
        default_window: Duration::from_secs(600),
        ..Default::default()
    })
    .await;

    let alert = push_alert("ElasticDown", "argus", "5");
    let fingerprint = fingerprint_labels(&alert.labels);

    harness.coordinator.receive_alerts(vec![alert.clone()], "push-itest002");
    harness.coordinator.snapshot_tick();
    harness.settle().await;

    assert_eq!(harness.noc.messages().len(), 1);
    assert_eq!(harness.noc.messages()[0].priority, 5);
    assert_eq!(harness.metrics.snapshot().noc_sent, 1);

    // The identical alert a little later: next snapshot suppresses it.
    harness.coordinator.receive_alerts(vec![alert], "push-itest003");
    harness.coordinator.snapshot_tick();
    harness.settle().await;

    assert_eq!(harness.noc.messages().len(), 1);
    assert_eq!(harness.metrics.snapshot().noc_suppressed, 1);
    assert_eq!(
        harness.vector.get(&fingerprint).unwrap().status,
        AlertStatus::Create
    );
    harness.stop().await;
}

#[tokio::test]
async fn test_failed_prometheus_pod_enqueues_only_the_create() {
    let harness = Harness::start(HarnessOptions::default()).await;

    let mut failed = healthy_pod("prometheus-0", "prometheus");
    failed.phase = "Failed".to_string();
    harness.lister.set(PROM_SELECTOR, vec![failed]);
    harness
        .lister
        .set(KSM_SELECTOR, vec![healthy_pod("ksm-0", "kube-state-metrics")]);

    harness.coordinator.poll_k8s("poll-itest004").await;

    let prom = harness.vector.get(PROMETHEUS_FINGERPRINT).unwrap();
    assert_eq!(prom.status, AlertStatus::Create);
    assert_eq!(prom.priority, -3);
    let ksm = harness.vector.get(KSM_FINGERPRINT).unwrap();
    assert_eq!(ksm.status, AlertStatus::Ignore);
    assert_eq!(ksm.priority, -2);

    harness.coordinator.snapshot_tick();
    harness.settle().await;

    let messages = harness.noc.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].priority, -3);
    harness.stop().await;
}

#[tokio::test]
async fn test_cancel_batch_flows_through_worker() {
    let harness = Harness::start(HarnessOptions::default()).await;

    let firing = push_alert("Flapper", "argus", "4");
    let fingerprint = fingerprint_labels(&firing.labels);
    harness.coordinator.receive_alerts(vec![firing.clone()], "push-itest005");

    let mut resolved = firing;
    resolved.status = Some("resolved".to_string());
    harness.coordinator.receive_alerts(vec![resolved], "push-itest006");

    harness.coordinator.snapshot_tick();
    harness.settle().await;

    // The worker withdrew the cancel and dropped the entry.
    assert!(harness.vector.get(&fingerprint).is_none());
    assert_eq!(harness.noc.messages().len(), 1);
    harness.stop().await;
}
