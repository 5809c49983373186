//! Request dispatch and the bounded event-handler fan-out.
//!
//! Two message types arrive from the worker: `Heartbeat` resets the pupil
//! watchdog (optionally re-arming with a new timeout and replacing the
//! escalation message), `SendNocMessage` forwards to NOC immediately.
//! Registered event handlers observe both, best-effort: they run on a small
//! worker pool behind a bounded queue (twice the worker count,
//! wait-on-full) and each invocation is time-boxed.

use std::sync::Arc;
use std::time::Duration;

use argus_core::noc::NocDetails;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::EventHandlerConfig;
use crate::noc_client::PupilNocClient;
use crate::watchdog::PupilWatchdog;

/// Message types the listener accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// The worker is alive.
    Heartbeat,
    /// Forward a message to NOC now.
    SendNocMessage,
}

/// A request from the supervised worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PupilRequest {
    /// What the worker wants.
    pub message_type: MessageType,

    /// Caller-supplied correlation ID.
    #[serde(default)]
    pub correlation_id: Option<String>,

    /// Caller-side timestamp.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    /// NOC details: the payload for `SendNocMessage`, or the escalation
    /// message to store for `Heartbeat`.
    #[serde(default)]
    pub noc_details: Option<NocDetails>,

    /// Watchdog timeout override, in seconds.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// The reply for every accepted request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PupilResponse {
    /// Whether the request was processed.
    pub accepted: bool,
    /// Correlation ID, echoed or generated.
    pub correlation_id: String,
    /// Human-readable outcome.
    pub message: String,
    /// Server-side timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Errors from request handling.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The request is structurally valid but unusable.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The NOC dispatch failed definitively.
    #[error("NOC dispatch failed: {0}")]
    DispatchFailed(String),
}

/// An observed pupil event, fanned out to registered handlers.
#[derive(Debug, Clone)]
pub enum PupilEvent {
    /// A heartbeat arrived.
    Heartbeat {
        /// Correlation ID of the request.
        correlation_id: String,
    },
    /// A NOC send was requested.
    SendNoc {
        /// The forwarded details.
        details: NocDetails,
        /// Correlation ID of the request.
        correlation_id: String,
    },
}

/// A registered event handler.
#[async_trait]
pub trait PupilEventHandler: Send + Sync {
    /// Handler name, for logs.
    fn name(&self) -> &str;

    /// Observe one event. Failures are logged, never propagated.
    async fn handle(&self, event: &PupilEvent);
}

/// Bounded fan-out of events to the registered handlers.
#[derive(Debug)]
pub struct EventDispatcher {
    queue: Option<mpsc::Sender<PupilEvent>>,
}

impl EventDispatcher {
    /// Spawn `max_concurrent_handlers` workers behind a queue of twice that
    /// size. With no handlers registered the dispatcher is inert.
    #[must_use]
    pub fn new(handlers: Vec<Arc<dyn PupilEventHandler>>, config: &EventHandlerConfig) -> Self {
        if handlers.is_empty() {
            return Self { queue: None };
        }

        let workers = config.max_concurrent_handlers.max(1);
        let (tx, rx) = mpsc::channel::<PupilEvent>(2 * workers);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let handlers = Arc::new(handlers);
        let timeout = config.handler_timeout;

        for _ in 0..workers {
            let rx = Arc::clone(&rx);
            let handlers = Arc::clone(&handlers);
            tokio::spawn(async move {
                loop {
                    let event = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(event) = event else {
                        return;
                    };
                    for handler in handlers.iter() {
                        run_handler(handler.as_ref(), &event, timeout).await;
                    }
                }
            });
        }

        Self { queue: Some(tx) }
    }

    /// Enqueue an event, waiting while the queue is full.
    pub async fn dispatch(&self, event: PupilEvent) {
        if let Some(queue) = &self.queue {
            if queue.send(event).await.is_err() {
                tracing::warn!("event workers gone, dropping event");
            }
        }
    }
}

/// Run one handler with its watchdog timeout.
async fn run_handler(handler: &dyn PupilEventHandler, event: &PupilEvent, timeout: Duration) {
    match tokio::time::timeout(timeout, handler.handle(event)).await {
        Ok(()) => {}
        Err(_) => {
            tracing::warn!(
                handler = %handler.name(),
                timeout = ?timeout,
                "event handler timed out"
            );
        }
    }
}

/// Dispatches listener requests to the watchdog, the NOC client and the
/// event handlers.
pub struct PupilHandler {
    watchdog: Arc<PupilWatchdog>,
    noc: Arc<PupilNocClient>,
    events: EventDispatcher,
}

impl PupilHandler {
    /// Create the handler.
    #[must_use]
    pub fn new(
        watchdog: Arc<PupilWatchdog>,
        noc: Arc<PupilNocClient>,
        events: EventDispatcher,
    ) -> Self {
        Self {
            watchdog,
            noc,
            events,
        }
    }

    /// Process one request.
    ///
    /// # Errors
    ///
    /// Returns an error when a `SendNocMessage` carries no details or its
    /// dispatch fails definitively.
    pub async fn handle(&self, request: PupilRequest) -> Result<PupilResponse, HandlerError> {
        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(crate::correlation_id);

        match request.message_type {
            MessageType::Heartbeat => {
                let timeout_override = request.timeout_seconds.map(Duration::from_secs);
                self.watchdog.heartbeat(timeout_override, request.noc_details);
                tracing::debug!(correlation_id = %correlation_id, "heartbeat recorded");

                self.events
                    .dispatch(PupilEvent::Heartbeat {
                        correlation_id: correlation_id.clone(),
                    })
                    .await;

                Ok(PupilResponse {
                    accepted: true,
                    correlation_id,
                    message: "heartbeat recorded".to_string(),
                    timestamp: Utc::now(),
                })
            }
            MessageType::SendNocMessage => {
                let details = request.noc_details.ok_or_else(|| {
                    HandlerError::InvalidRequest(
                        "SendNocMessage requires nocDetails".to_string(),
                    )
                })?;

                self.noc
                    .send(&details, &correlation_id)
                    .await
                    .map_err(|e| HandlerError::DispatchFailed(e.to_string()))?;

                self.events
                    .dispatch(PupilEvent::SendNoc {
                        details,
                        correlation_id: correlation_id.clone(),
                    })
                    .await;

                Ok(PupilResponse {
                    accepted: true,
                    correlation_id,
                    message: "message dispatched".to_string(),
                    timestamp: Utc::now(),
                })
            }
        }
    }
}

impl std::fmt::Debug for PupilHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PupilHandler").finish_non_exhaustive()
    }
}
