//! FIFO decision queue and the worker that drains it.
//!
//! The queue carries [`NocDecision`]s plus the duplicate-window marks that
//! keep one fingerprint from being re-enqueued every snapshot. The worker
//! dispatches at most one decision per iteration, re-reading the vector
//! first so it never acts on a stale status.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use argus_core::alert::AlertStatus;
use argus_core::noc::NocMessage;
use tokio::sync::{watch, Notify};

use super::client::NocDispatcher;
use super::{NocDecision, SuppressionCache};
use crate::metrics::Metrics;
use crate::vector::AlertsVector;

#[derive(Debug, Default)]
struct QueueInner {
    queue: VecDeque<NocDecision>,
    marks: HashMap<String, Instant>,
}

/// FIFO of pending decisions with duplicate-window marks.
#[derive(Debug)]
pub struct NocQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    duplicate_window: Duration,
}

impl NocQueue {
    /// Create a queue with the given duplicate window.
    #[must_use]
    pub fn new(duplicate_window: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            duplicate_window,
        })
    }

    /// Append a decision and wake the worker.
    pub fn enqueue(&self, decision: NocDecision) {
        self.lock().queue.push_back(decision);
        self.notify.notify_one();
    }

    /// Number of queued decisions.
    pub fn depth(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether a mark newer than the duplicate window exists.
    pub fn was_recently_enqueued(&self, fingerprint: &str) -> bool {
        self.lock()
            .marks
            .get(fingerprint)
            .is_some_and(|marked| marked.elapsed() < self.duplicate_window)
    }

    /// Record that a fingerprint was just enqueued.
    pub fn mark_enqueued(&self, fingerprint: &str) {
        self.lock()
            .marks
            .insert(fingerprint.to_string(), Instant::now());
    }

    /// Take the oldest decision.
    pub fn pop(&self) -> Option<NocDecision> {
        self.lock().queue.pop_front()
    }

    /// Drop marks older than the duplicate window.
    pub fn cleanup_marks(&self) {
        let window = self.duplicate_window;
        self.lock()
            .marks
            .retain(|_, marked| marked.elapsed() < window);
    }

    async fn wait_for_work(&self) {
        self.notify.notified().await;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Drains the queue and dispatches to the NOC endpoint.
pub struct NocWorker {
    queue: Arc<NocQueue>,
    vector: Arc<AlertsVector>,
    suppression: Arc<SuppressionCache>,
    dispatcher: Arc<dyn NocDispatcher>,
    metrics: Arc<Metrics>,
    cleanup_interval: Duration,
}

impl NocWorker {
    /// Create a worker.
    #[must_use]
    pub fn new(
        queue: Arc<NocQueue>,
        vector: Arc<AlertsVector>,
        suppression: Arc<SuppressionCache>,
        dispatcher: Arc<dyn NocDispatcher>,
        metrics: Arc<Metrics>,
        cleanup_interval: Duration,
    ) -> Self {
        Self {
            queue,
            vector,
            suppression,
            dispatcher,
            metrics,
            cleanup_interval,
        }
    }

    /// Run until the shutdown signal flips. Undispatched decisions are
    /// dropped; L2 and the next snapshot re-derive them.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut next_cleanup = tokio::time::Instant::now() + self.cleanup_interval;

        loop {
            if *shutdown.borrow() {
                tracing::info!(dropped = self.queue.depth(), "NOC worker shutting down");
                return;
            }

            if tokio::time::Instant::now() >= next_cleanup {
                self.queue.cleanup_marks();
                self.suppression.cleanup();
                next_cleanup = tokio::time::Instant::now() + self.cleanup_interval;
            }

            self.metrics.set_queue_depth(self.queue.depth());

            if let Some(decision) = self.queue.pop() {
                self.dispatch(decision).await;
                continue;
            }

            tokio::select! {
                () = self.queue.wait_for_work() => {}
                () = tokio::time::sleep_until(next_cleanup) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Dispatch one decision.
    pub async fn dispatch(&self, decision: NocDecision) {
        match decision {
            NocDecision::HandleCreate {
                alert,
                correlation_id,
                ..
            } => self.handle_create(&alert.fingerprint, &correlation_id).await,
            NocDecision::HandleUnknown {
                alert,
                correlation_id,
                ..
            } => self.handle_unknown(&alert.fingerprint, &correlation_id).await,
            NocDecision::HandleCancels {
                alerts,
                correlation_id,
                ..
            } => self.handle_cancels(&alerts, &correlation_id).await,
        }
    }

    async fn handle_create(&self, fingerprint: &str, correlation_id: &str) {
        // Re-read: the decision may be older than the vector state.
        let Some(current) = self.vector.get(fingerprint) else {
            return;
        };
        if current.status != AlertStatus::Create {
            tracing::debug!(
                fingerprint = %fingerprint,
                status = %current.status,
                "skipping create decision, status changed"
            );
            return;
        }

        if self.suppression.should_suppress(&current) {
            self.metrics.noc_suppressed();
            tracing::debug!(fingerprint = %fingerprint, "dispatch suppressed");
            return;
        }

        if !current.send_to_noc {
            // Keep suppression honest for alerts that never leave.
            self.suppression.mark_as_sent(&current);
            return;
        }

        let message = NocMessage::from_alert(&current, correlation_id);
        match self.dispatcher.post(&message).await {
            Ok(()) => {
                self.suppression.mark_as_sent(&current);
                self.metrics.noc_sent();
                tracing::info!(
                    fingerprint = %fingerprint,
                    correlation_id = %correlation_id,
                    "alert dispatched to NOC"
                );
            }
            Err(error) => {
                self.metrics.noc_send_failed();
                tracing::warn!(
                    fingerprint = %fingerprint,
                    correlation_id = %correlation_id,
                    %error,
                    "NOC dispatch failed"
                );
            }
        }
    }

    async fn handle_unknown(&self, fingerprint: &str, correlation_id: &str) {
        let Some(current) = self.vector.get(fingerprint) else {
            return;
        };
        if current.status != AlertStatus::Unknown {
            return;
        }

        if self.suppression.should_suppress(&current) {
            self.metrics.noc_suppressed();
            return;
        }

        if !current.send_to_noc {
            self.suppression.mark_as_sent(&current);
            // UNKNOWN is one-shot: drop it once handled.
            self.vector.remove_alert(fingerprint);
            return;
        }

        let message = NocMessage::from_alert(&current, correlation_id);
        match self.dispatcher.post(&message).await {
            Ok(()) => {
                self.suppression.mark_as_sent(&current);
                self.metrics.noc_sent();
                self.vector.remove_alert(fingerprint);
            }
            Err(error) => {
                self.metrics.noc_send_failed();
                tracing::warn!(
                    fingerprint = %fingerprint,
                    %error,
                    "NOC dispatch of UNKNOWN failed"
                );
            }
        }
    }

    async fn handle_cancels(&self, alerts: &[argus_core::alert::Alert], correlation_id: &str) {
        // Keep only entries still CANCEL at dispatch time.
        let still_cancel: Vec<_> = alerts
            .iter()
            .filter_map(|alert| self.vector.get(&alert.fingerprint))
            .filter(|current| current.status == AlertStatus::Cancel)
            .collect();

        for current in still_cancel.iter().filter(|a| a.send_to_noc) {
            let message = NocMessage::from_alert(current, correlation_id);
            match self.dispatcher.post(&message).await {
                Ok(()) => {
                    self.metrics.noc_sent();
                }
                Err(error) => {
                    self.metrics.noc_send_failed();
                    tracing::warn!(
                        fingerprint = %current.fingerprint,
                        %error,
                        "NOC dispatch of CANCEL failed"
                    );
                }
            }
        }

        // Cancels leave the vector whether or not the POST succeeded; a
        // later CREATE re-establishes NOC state if the condition returns.
        for current in &still_cancel {
            self.vector.remove_alert(&current.fingerprint);
        }
    }
}

impl std::fmt::Debug for NocWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NocWorker")
            .field("cleanup_interval", &self.cleanup_interval)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;

    use argus_core::alert::Alert;
    use chrono::Utc;

    use super::test_support::RecordingDispatcher;
    use super::*;

    fn alert(fingerprint: &str, status: AlertStatus, send_to_noc: bool) -> Alert {
        Alert {
            priority: 5,
            name: fingerprint.to_string(),
            summary: format!("{fingerprint} summary"),
            description: String::new(),
            payload: String::new(),
            source: "test".to_string(),
            fingerprint: fingerprint.to_string(),
            status,
            send_to_noc,
            suppress_window: None,
            timestamp: Utc::now(),
            last_seen: Utc::now(),
            annotations: BTreeMap::new(),
            execution_id: String::new(),
            prometheus: None,
        }
    }

    struct Fixture {
        vector: Arc<AlertsVector>,
        dispatcher: Arc<RecordingDispatcher>,
        metrics: Arc<Metrics>,
        worker: NocWorker,
        queue: Arc<NocQueue>,
    }

    fn fixture(default_window: Duration) -> Fixture {
        let metrics = Metrics::new().unwrap();
        let vector = Arc::new(AlertsVector::new(
            Duration::from_secs(3600),
            Arc::clone(&metrics),
        ));
        let queue = NocQueue::new(Duration::from_secs(30));
        let suppression = Arc::new(SuppressionCache::new(default_window));
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let worker = NocWorker::new(
            Arc::clone(&queue),
            Arc::clone(&vector),
            suppression,
            Arc::clone(&dispatcher) as Arc<dyn NocDispatcher>,
            Arc::clone(&metrics),
            Duration::from_secs(60),
        );
        Fixture {
            vector,
            dispatcher,
            metrics,
            worker,
            queue,
        }
    }

    #[test]
    fn test_queue_is_fifo() {
        let queue = NocQueue::new(Duration::from_secs(30));
        queue.enqueue(NocDecision::create(
            alert("first", AlertStatus::Create, true),
            "snapshot-1",
        ));
        queue.enqueue(NocDecision::create(
            alert("second", AlertStatus::Create, true),
            "snapshot-2",
        ));

        assert_eq!(queue.depth(), 2);
        match queue.pop().unwrap() {
            NocDecision::HandleCreate { alert, .. } => assert_eq!(alert.fingerprint, "first"),
            other => panic!("unexpected decision {}", other.kind()),
        }
    }

    #[test]
    fn test_duplicate_window_marks() {
        let queue = NocQueue::new(Duration::from_millis(30));
        assert!(!queue.was_recently_enqueued("a"));
        queue.mark_enqueued("a");
        assert!(queue.was_recently_enqueued("a"));

        std::thread::sleep(Duration::from_millis(50));
        assert!(!queue.was_recently_enqueued("a"));
        queue.cleanup_marks();
    }

    #[tokio::test]
    async fn test_create_dispatches_and_marks_sent() {
        let f = fixture(Duration::from_secs(600));
        let a = alert("a", AlertStatus::Create, true);
        f.vector.update_alert(a.clone()).unwrap();

        f.worker.dispatch(NocDecision::create(a.clone(), "snapshot-1")).await;
        assert_eq!(f.dispatcher.sent.lock().unwrap().len(), 1);
        assert_eq!(f.metrics.snapshot().noc_sent, 1);

        // Second dispatch within the window is suppressed.
        f.worker.dispatch(NocDecision::create(a, "snapshot-2")).await;
        assert_eq!(f.dispatcher.sent.lock().unwrap().len(), 1);
        assert_eq!(f.metrics.snapshot().noc_suppressed, 1);
    }

    #[tokio::test]
    async fn test_create_skipped_when_status_changed() {
        let f = fixture(Duration::from_secs(600));
        let a = alert("a", AlertStatus::Create, true);
        f.vector.update_alert(a.clone()).unwrap();
        f.vector.update_alert(alert("a", AlertStatus::Cancel, true)).unwrap();

        f.worker.dispatch(NocDecision::create(a, "snapshot-1")).await;
        assert!(f.dispatcher.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_without_send_to_noc_marks_but_does_not_post() {
        let f = fixture(Duration::from_secs(600));
        let a = alert("a", AlertStatus::Create, false);
        f.vector.update_alert(a.clone()).unwrap();

        f.worker.dispatch(NocDecision::create(a.clone(), "snapshot-1")).await;
        assert!(f.dispatcher.sent.lock().unwrap().is_empty());
        assert_eq!(f.metrics.snapshot().noc_sent, 0);

        // The mark keeps suppression honest: a later send_to_noc flip within
        // the window stays quiet.
        let mut flipped = a;
        flipped.send_to_noc = true;
        f.vector.update_alert(flipped.clone()).unwrap();
        f.worker.dispatch(NocDecision::create(flipped, "snapshot-2")).await;
        assert!(f.dispatcher.sent.lock().unwrap().is_empty());
        assert_eq!(f.metrics.snapshot().noc_suppressed, 1);
    }

    #[tokio::test]
    async fn test_failed_post_is_not_marked_sent() {
        let f = fixture(Duration::from_secs(600));
        let a = alert("a", AlertStatus::Create, true);
        f.vector.update_alert(a.clone()).unwrap();

        f.dispatcher.failing.store(true, Ordering::SeqCst);
        f.worker.dispatch(NocDecision::create(a.clone(), "snapshot-1")).await;
        assert_eq!(f.metrics.snapshot().noc_send_failures, 1);

        // Next dispatch retries the POST instead of being suppressed.
        f.dispatcher.failing.store(false, Ordering::SeqCst);
        f.worker.dispatch(NocDecision::create(a, "snapshot-2")).await;
        assert_eq!(f.dispatcher.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_is_one_shot() {
        let f = fixture(Duration::from_secs(600));
        let a = alert("a", AlertStatus::Unknown, true);
        f.vector.update_alert(a.clone()).unwrap();

        f.worker.dispatch(NocDecision::unknown(a, "snapshot-1")).await;
        assert_eq!(f.dispatcher.sent.lock().unwrap().len(), 1);
        assert!(f.vector.get("a").is_none());
    }

    #[tokio::test]
    async fn test_unknown_failed_post_stays_in_vector() {
        let f = fixture(Duration::from_secs(600));
        let a = alert("a", AlertStatus::Unknown, true);
        f.vector.update_alert(a.clone()).unwrap();

        f.dispatcher.failing.store(true, Ordering::SeqCst);
        f.worker.dispatch(NocDecision::unknown(a, "snapshot-1")).await;
        assert!(f.vector.get("a").is_some());
    }

    #[tokio::test]
    async fn test_cancels_remove_regardless_of_send_flag() {
        let f = fixture(Duration::from_secs(600));
        for (fingerprint, send) in [("sent", true), ("silent", false)] {
            f.vector
                .update_alert(alert(fingerprint, AlertStatus::Create, send))
                .unwrap();
            f.vector
                .update_alert(alert(fingerprint, AlertStatus::Cancel, send))
                .unwrap();
        }

        let batch = vec![
            alert("sent", AlertStatus::Cancel, true),
            alert("silent", AlertStatus::Cancel, false),
        ];
        f.worker.dispatch(NocDecision::cancels(batch, "snapshot-1")).await;

        assert_eq!(f.dispatcher.sent.lock().unwrap().len(), 1);
        assert!(f.vector.get("sent").is_none());
        assert!(f.vector.get("silent").is_none());
    }

    #[tokio::test]
    async fn test_cancels_skip_entries_no_longer_cancel() {
        let f = fixture(Duration::from_secs(600));
        f.vector.update_alert(alert("a", AlertStatus::Create, true)).unwrap();

        f.worker
            .dispatch(NocDecision::cancels(
                vec![alert("a", AlertStatus::Cancel, true)],
                "snapshot-1",
            ))
            .await;

        assert!(f.dispatcher.sent.lock().unwrap().is_empty());
        assert!(f.vector.get("a").is_some());
    }

    #[tokio::test]
    async fn test_run_drains_queue_and_stops() {
        let f = fixture(Duration::from_secs(600));
        let a = alert("a", AlertStatus::Create, true);
        f.vector.update_alert(a.clone()).unwrap();
        f.queue.enqueue(NocDecision::create(a, "snapshot-1"));

        let (tx, rx) = watch::channel(false);
        let dispatcher = Arc::clone(&f.dispatcher);
        let handle = tokio::spawn(f.worker.run(rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.sent.lock().unwrap().len(), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
