//! Background L1 to L2 flush loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::AlertStore;
use crate::vector::AlertsVector;

/// Periodically flushes the vector's pending changes to L2.
#[derive(Debug)]
pub struct BatchWriter {
    vector: Arc<AlertsVector>,
    store: Arc<AlertStore>,
    window: Duration,
}

impl BatchWriter {
    /// Create a writer flushing every `window`.
    #[must_use]
    pub fn new(vector: Arc<AlertsVector>, store: Arc<AlertStore>, window: Duration) -> Self {
        Self {
            vector,
            store,
            window,
        }
    }

    /// Run until the shutdown signal flips, then flush one final time.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.window);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("batch writer shutting down, final flush");
                        self.flush().await;
                        return;
                    }
                }
            }
        }
    }

    /// Flush one cycle: save dirty entries, remove tombstoned ones, and
    /// clear flags only for the keys that actually reached L2.
    pub async fn flush(&self) {
        let pending = self.vector.pending_changes();

        if !pending.dirty.is_empty() {
            let persisted = self.store.save_batch(&pending.dirty).await;
            if !persisted.is_empty() {
                tracing::debug!(count = persisted.len(), "flushed dirty alerts to L2");
            }
            self.vector.clear_dirty_flags(&persisted);
        }

        if !pending.tombstoned.is_empty() {
            let removed = self.store.remove_batch(&pending.tombstoned).await;
            if !removed.is_empty() {
                tracing::debug!(count = removed.len(), "removed tombstoned alerts from L2");
            }
            self.vector.clear_removed_flags(&removed);
        }
    }
}
