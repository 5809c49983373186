//! Listener contract over real HTTP: status codes, API key handling and
//! the heartbeat/send flows.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use argus_core::noc::NocClientConfig;
use argus_core::watchdog::WatchdogConfig;
use argus_pupil::config::{EventHandlerConfig, ListenerConfig, PersistenceConfig};
use argus_pupil::handler::{EventDispatcher, PupilHandler};
use argus_pupil::listener::{self, ListenerState};
use argus_pupil::noc_client::PupilNocClient;
use argus_pupil::recovery::RecoveryStore;
use argus_pupil::watchdog::PupilWatchdog;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tokio::sync::watch;

struct Fixture {
    base: String,
    noc_status: Arc<AtomicU16>,
    watchdog: Arc<PupilWatchdog>,
    _dir: tempfile::TempDir,
}

async fn start(api_key: Option<&str>) -> Fixture {
    // Mock NOC.
    let noc_status = Arc::new(AtomicU16::new(200));
    let status = Arc::clone(&noc_status);
    async fn noc_handle(State(status): State<Arc<AtomicU16>>) -> StatusCode {
        StatusCode::from_u16(status.load(Ordering::SeqCst)).unwrap()
    }
    let noc_app = Router::new().route("/", post(noc_handle)).with_state(status);
    let noc_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let noc_addr = noc_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(noc_listener, noc_app).await.unwrap();
    });

    // Pupil stack.
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RecoveryStore::new(&PersistenceConfig {
        storage_path: dir.path().to_path_buf(),
        recovery_file_name: "recovery.json".to_string(),
    }));
    let (shutdown_tx, _shutdown_rx) = watch::channel(false);
    let noc = Arc::new(
        PupilNocClient::new(
            NocClientConfig {
                endpoint: format!("http://{noc_addr}/"),
                timeout: Duration::from_secs(2),
                max_retries: 0,
                retry_delay_ms: 1,
                retry_multiplier: 1.0,
            },
            store,
            shutdown_tx,
        )
        .unwrap(),
    );
    let watchdog = PupilWatchdog::new(
        WatchdogConfig {
            timeout: Duration::from_secs(60),
            normal_grace_period: Duration::ZERO,
            crash_recovery_grace_period: Duration::ZERO,
            ..Default::default()
        },
        false,
        Arc::clone(&noc),
    );

    let listener_config = ListenerConfig {
        api_key: api_key.map(ToString::to_string),
        ..Default::default()
    };
    let events = EventDispatcher::new(Vec::new(), &EventHandlerConfig::default());
    let handler = PupilHandler::new(Arc::clone(&watchdog), noc, events);
    let state = Arc::new(ListenerState {
        handler,
        api_key: listener_config.api_key.clone(),
        watchdog: Arc::clone(&watchdog),
    });
    let app = listener::router(&listener_config, state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Fixture {
        base: format!("http://{addr}"),
        noc_status,
        watchdog,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_heartbeat_round_trip() {
    let fixture = start(None).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/pupil", fixture.base))
        .json(&serde_json::json!({
            "messageType": "Heartbeat",
            "correlationId": "pupil-http0001",
            "timeoutSeconds": 120
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["accepted"], true);
    assert_eq!(body["correlationId"], "pupil-http0001");

    let state = fixture.watchdog.state();
    assert!(state.last_heartbeat.is_some());
    assert!(!state.expired);
}

#[tokio::test]
async fn test_invalid_body_is_400() {
    let fixture = start(None).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/pupil", fixture.base))
        .header("content-type", "application/json")
        .body("{broken")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_api_key_enforced() {
    let fixture = start(Some("pupil-secret")).await;
    let client = reqwest::Client::new();
    let body = serde_json::json!({"messageType": "Heartbeat"});

    let missing = client
        .post(format!("{}/pupil", fixture.base))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 401);

    let wrong = client
        .post(format!("{}/pupil", fixture.base))
        .header("X-API-Key", "nope")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);

    let correct = client
        .post(format!("{}/pupil", fixture.base))
        .header("X-API-Key", "pupil-secret")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(correct.status(), 200);
}

#[tokio::test]
async fn test_send_noc_message_forwards() {
    let fixture = start(None).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/pupil", fixture.base))
        .json(&serde_json::json!({
            "messageType": "SendNocMessage",
            "nocDetails": {
                "name": "ManualPage",
                "summary": "operator requested escalation"
            }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_send_noc_without_details_is_400() {
    let fixture = start(None).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/pupil", fixture.base))
        .json(&serde_json::json!({"messageType": "SendNocMessage"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_send_noc_failure_is_500() {
    let fixture = start(None).await;
    fixture.noc_status.store(500, Ordering::SeqCst);
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/pupil", fixture.base))
        .json(&serde_json::json!({
            "messageType": "SendNocMessage",
            "nocDetails": {
                "name": "ManualPage",
                "summary": "operator requested escalation"
            }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
}

#[tokio::test]
async fn test_health_reports_watchdog() {
    let fixture = start(None).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", fixture.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["watchdog"].get("expired").is_some());
}
