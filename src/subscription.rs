//! Push-based, filtered, ordered event delivery: catch-up then tailing.
//!
//! A [`Subscription`] runs on a background task that first delivers every
//! already-stored matching event in ascending global order, then keeps
//! tailing newly appended events in the same order. Deliveries never
//! overlap: the next event is not delivered until the previous callback
//! completes, which is what keeps fold-order correct for subscribers like
//! the replay runner.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::EventStoreError;
use crate::event::{StoredEvent, TypeFilter};
use crate::eventstore::EventStore;

/// Callback surface implemented by subscribers.
///
/// Errors encountered while reading or delivering are reported through
/// [`on_error`](EventSubscriber::on_error); the subscription does not
/// terminate itself on error; the subscriber decides what to do.
#[async_trait]
pub trait EventSubscriber: Send + Sync + 'static {
    /// Called for every matching event, strictly in global order.
    async fn on_event(&self, event: &StoredEvent);

    /// Called when reading from the store fails. Delivery resumes from the
    /// same position once the log changes again.
    async fn on_error(&self, error: &EventStoreError);
}

/// Handle to a running subscription.
///
/// Dropping the handle does **not** stop delivery; call
/// [`stop`](Subscription::stop) for graceful termination with drain
/// semantics.
pub struct Subscription {
    shutdown_tx: watch::Sender<bool>,
    /// The spawned delivery task. Wrapped in `Option` so it can be taken
    /// and joined exactly once; `stopped_tx` flips after the join so
    /// every other [`stop`](Subscription::stop) caller still waits out
    /// the drain.
    task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    stopped_tx: watch::Sender<bool>,
}

impl Subscription {
    /// Start delivering events from `store` to `subscriber`.
    ///
    /// Catch-up begins at the start of the log (position 0); once the
    /// cursor reaches the head, the task waits on the store's head watch
    /// and tails new appends with no gap or duplicate.
    pub fn spawn(
        store: Arc<dyn EventStore>,
        subscriber: Arc<dyn EventSubscriber>,
        filter: TypeFilter,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (stopped_tx, _) = watch::channel(false);
        let task = tokio::spawn(run_delivery(store, subscriber, filter, shutdown_rx));
        Self {
            shutdown_tx,
            task: tokio::sync::Mutex::new(Some(task)),
            stopped_tx,
        }
    }

    /// Stop the subscription.
    ///
    /// Signals shutdown, then awaits the delivery task: a callback already
    /// in progress is allowed to finish (drain, not abort), and no callback
    /// is invoked after `stop` returns. Calling `stop` more than once is
    /// safe; every call, including concurrent ones, returns only after the
    /// delivery task has fully drained.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::Io`] if the delivery task panicked.
    pub async fn stop(&self) -> Result<(), EventStoreError> {
        let _ = self.shutdown_tx.send(true);

        let task = self.task.lock().await.take();
        match task {
            Some(join_handle) => {
                let result = join_handle.await;
                // Flip the flag before surfacing a panic so concurrent
                // callers are not left waiting.
                let _ = self.stopped_tx.send(true);
                result.map_err(|e| {
                    std::io::Error::other(format!("delivery task panicked: {e}"))
                })?;
            }
            None => {
                // Another caller holds the join; wait until the drain
                // completes before returning.
                let mut stopped_rx = self.stopped_tx.subscribe();
                stopped_rx
                    .wait_for(|stopped| *stopped)
                    .await
                    .map_err(|_| std::io::Error::other("subscription stop signal lost"))?;
            }
        }
        Ok(())
    }
}

/// Delivery loop: read from the cursor, deliver matches, wait for appends.
async fn run_delivery(
    store: Arc<dyn EventStore>,
    subscriber: Arc<dyn EventSubscriber>,
    filter: TypeFilter,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut position = 0u64;
    let mut head_rx = store.head();

    'outer: loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // Mark the head as seen *before* reading, so an append racing with
        // the read either lands in this batch or re-wakes the watch below.
        let _ = head_rx.borrow_and_update();

        let batch = match store.read_all_from(position).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(position, error = %e, "subscription read failed");
                subscriber.on_error(&e).await;
                // Wait for the log to change before retrying, so a
                // persistent fault does not spin.
                tokio::select! {
                    res = head_rx.changed() => {
                        if res.is_err() {
                            break 'outer;
                        }
                    }
                    _ = shutdown_rx.changed() => break 'outer,
                }
                continue;
            }
        };

        if batch.is_empty() {
            // Caught up; wait for the next append or shutdown.
            tokio::select! {
                res = head_rx.changed() => {
                    if res.is_err() {
                        // Store dropped; no further events can arrive.
                        break 'outer;
                    }
                }
                _ = shutdown_rx.changed() => break 'outer,
            }
            continue;
        }

        for event in &batch {
            if *shutdown_rx.borrow() {
                break 'outer;
            }
            if filter.matches(&event.event_type) {
                subscriber.on_event(event).await;
            }
            position = event.global_position + 1;
        }
    }

    tracing::debug!(position, "subscription stopped");
}
