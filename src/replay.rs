//! Full-log replay: rebuild aggregate snapshots from the event store.
//!
//! The runner opens a catch-all subscription and folds every recognized
//! event into its target aggregate, persisting a snapshot per event at
//! the event's stream version. Completion is detected by quiescence: a
//! resettable idle timer that fires once no event has arrived for the
//! configured interval, at which point the subscription is stopped and
//! drained.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::EventStoreError;
use crate::event::{StoredEvent, TypeFilter};
use crate::model::{AppState, AssetState, ContentState, FieldTypeResolver, SchemaState};
use crate::payload::{Category, CoreEvent};
use crate::store::GrainStore;
use crate::subscription::{EventSubscriber, Subscription};

/// Configuration for the replay runner.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// How long the log must stay quiet before the replay is considered
    /// complete.
    pub idle_interval: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(5),
        }
    }
}

/// Outcome counters of one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Events folded and persisted.
    pub replayed: u64,
    /// Events whose type or payload shape is unknown.
    pub skipped: u64,
    /// Events whose snapshot write failed.
    pub failed: u64,
}

/// Rebuilds aggregate snapshots by replaying the whole event log.
pub struct ReplayRunner {
    store: GrainStore,
    resolver: Arc<dyn FieldTypeResolver>,
    config: ReplayConfig,
}

impl ReplayRunner {
    pub fn new(
        store: GrainStore,
        resolver: Arc<dyn FieldTypeResolver>,
        config: ReplayConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            config,
        }
    }

    /// Replay the log from the beginning until it goes quiet, then stop
    /// the subscription and return the counters.
    ///
    /// # Errors
    ///
    /// Fails only if the subscription cannot be stopped cleanly; per-event
    /// failures are counted in the report instead.
    pub async fn run(&self) -> Result<ReplayReport, EventStoreError> {
        let (tick_tx, mut tick_rx) = mpsc::channel::<()>(64);
        let (done_tx, done_rx) = oneshot::channel::<()>();

        // Quiescence timer: every delivered event resets it; once the log
        // stays quiet for a full interval it fires exactly once.
        let idle = self.config.idle_interval;
        let timer = tokio::spawn(async move {
            loop {
                match tokio::time::timeout(idle, tick_rx.recv()).await {
                    Ok(Some(())) => continue,
                    Ok(None) => break,
                    Err(_elapsed) => {
                        let _ = done_tx.send(());
                        break;
                    }
                }
            }
        });

        let subscriber = Arc::new(ReplaySubscriber {
            store: self.store.clone(),
            resolver: self.resolver.clone(),
            tick_tx,
            replayed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        tracing::info!("starting full-log replay");
        let subscription = Subscription::spawn(
            self.store.events(),
            subscriber.clone(),
            TypeFilter::match_all(),
        );

        // Fires when the timer detects quiescence. An Err here means the
        // timer task died, in which case stopping is still the right move.
        let _ = done_rx.await;
        subscription.stop().await?;
        let _ = timer.await;

        let report = subscriber.report();
        tracing::info!(
            replayed = report.replayed,
            skipped = report.skipped,
            failed = report.failed,
            "replay complete"
        );
        Ok(report)
    }
}

/// Subscriber that folds each delivered event into its target aggregate.
struct ReplaySubscriber {
    store: GrainStore,
    resolver: Arc<dyn FieldTypeResolver>,
    tick_tx: mpsc::Sender<()>,
    replayed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl ReplaySubscriber {
    fn report(&self) -> ReplayReport {
        ReplayReport {
            replayed: self.replayed.load(Ordering::Acquire),
            skipped: self.skipped.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
        }
    }

    /// Fold `core` into its aggregate and persist at the event's stream
    /// version.
    ///
    /// Asset and content identities are materialized fresh; schema and app
    /// identities go through the singleton lookup, which defaults missing
    /// state the same way.
    async fn dispatch(&self, core: &CoreEvent, event: &StoredEvent) -> Result<(), crate::error::PersistenceError> {
        let id = core.target_id().to_string();
        match core.category() {
            Category::Asset => {
                let mut object = self.store.create_object::<AssetState>(&id).await?;
                let next = object.state().clone().apply(core);
                object.update_state(next);
                object.write_state(event.stream_version)
            }
            Category::Content => {
                let mut object = self.store.create_object::<ContentState>(&id).await?;
                let next = object.state().clone().apply(core);
                object.update_state(next);
                object.write_state(event.stream_version)
            }
            Category::Schema => {
                let mut object = self.store.get_single_object::<SchemaState>(&id).await?;
                let next = object.state().clone().apply(core, self.resolver.as_ref());
                object.update_state(next);
                object.write_state(event.stream_version)
            }
            Category::App => {
                let mut object = self.store.get_single_object::<AppState>(&id).await?;
                let next = object.state().clone().apply(core);
                object.update_state(next);
                object.write_state(event.stream_version)
            }
        }
    }
}

#[async_trait]
impl EventSubscriber for ReplaySubscriber {
    async fn on_event(&self, event: &StoredEvent) {
        match CoreEvent::from_stored(event) {
            Some(core) => match self.dispatch(&core, event).await {
                Ok(()) => {
                    self.replayed.fetch_add(1, Ordering::AcqRel);
                }
                Err(error) => {
                    tracing::error!(
                        event_type = %event.event_type,
                        stream_id = %event.stream_id,
                        %error,
                        "replay write failed"
                    );
                    self.failed.fetch_add(1, Ordering::AcqRel);
                }
            },
            None => {
                tracing::debug!(
                    event_type = %event.event_type,
                    "unknown event type, skipping"
                );
                self.skipped.fetch_add(1, Ordering::AcqRel);
            }
        }
        // Reset the quiescence timer.
        let _ = self.tick_tx.send(()).await;
    }

    async fn on_error(&self, error: &EventStoreError) {
        tracing::error!(%error, "replay subscription error");
    }
}
