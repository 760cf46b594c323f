//! Top-level entry point that composes activation, handle caching, and
//! the persistence backends into a single [`GrainStore`] type.
//!
//! The store is opened via [`GrainStoreBuilder`], which configures the
//! snapshot and event store backends and the idle timeout for grain
//! eviction.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::domain::{DomainObject, DomainState};
use crate::error::{GrainError, PersistenceError};
use crate::eventstore::{EventStore, MemEventStore};
use crate::grain::{Grain, GrainConfig, GrainHandle, spawn_grain};
use crate::persistence::StateStore;
use crate::snapshot::{FsSnapshotStore, SnapshotStore};

/// Type-erased handle cache keyed by `(TypeId, instance_id)`.
///
/// `TypeId` identifies the grain type at runtime; the `String` is the
/// instance ID. `Box<dyn Any + Send + Sync>` lets a single map hold
/// `GrainHandle<G>` for any concrete `G`. Downcasting recovers the typed
/// handle.
type HandleCache = HashMap<(TypeId, String), Box<dyn Any + Send + Sync>>;

/// Default idle timeout for grain eviction: 5 minutes.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Central registry that manages grain instance lifecycles.
///
/// Guarantees exactly one live grain per `(type, identity)`: all callers
/// holding handles to the same identity reach the same queue-draining
/// task, so state-mutating operations are serialized in issue order.
///
/// `Clone` is cheap -- all internal state is `Arc`-wrapped.
#[derive(Clone)]
pub struct GrainStore {
    state_store: StateStore,
    cache: Arc<RwLock<HandleCache>>,
    idle_timeout: Duration,
}

impl std::fmt::Debug for GrainStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrainStore")
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl GrainStore {
    /// Start configuring a new store.
    pub fn builder() -> GrainStoreBuilder {
        GrainStoreBuilder::new()
    }

    /// The state store grains persist through.
    pub fn state_store(&self) -> &StateStore {
        &self.state_store
    }

    /// The event store backend, shared with subscriptions and the replay
    /// runner.
    pub fn events(&self) -> Arc<dyn EventStore> {
        self.state_store.events()
    }

    /// Get the one logical grain instance for `id`, activating it if
    /// needed.
    ///
    /// If the grain is already active (cached and alive), returns a clone
    /// of the existing handle -- repeated activation is idempotent.
    /// A never-written identity activates with default (empty) state.
    pub async fn get_single<G: Grain>(&self, id: &str) -> Result<GrainHandle<G>, GrainError> {
        let key = (TypeId::of::<G>(), id.to_owned());

        // Fast path: check cache with read lock.
        {
            let cache = self.cache.read().await;
            if let Some(boxed) = cache.get(&key)
                && let Some(handle) = boxed.downcast_ref::<GrainHandle<G>>()
                && handle.is_alive()
            {
                return Ok(handle.clone());
            }
        }

        // Slow path: evict any stale entry and activate.
        let mut cache = self.cache.write().await;
        if let Some(boxed) = cache.get(&key)
            && let Some(handle) = boxed.downcast_ref::<GrainHandle<G>>()
            && handle.is_alive()
        {
            // Another caller activated while we waited for the write lock.
            return Ok(handle.clone());
        }
        cache.remove(&key);

        let handle = self.activate::<G>(id).await?;
        cache.insert(key, Box::new(handle.clone()));
        Ok(handle)
    }

    /// Produce a fresh grain instance for `id`, displacing any active one.
    ///
    /// The displaced grain drains its queue and deactivates; stale handles
    /// to it fail with [`GrainError::Gone`], and any write raced through
    /// one is rejected by the version check. The shutdown request waits
    /// for a queue slot, so displacement also lands when the displaced
    /// grain's queue is full. Used when the caller does not require the
    /// aggregate to already exist.
    pub async fn create<G: Grain>(&self, id: &str) -> Result<GrainHandle<G>, GrainError> {
        let key = (TypeId::of::<G>(), id.to_owned());

        let mut cache = self.cache.write().await;
        if let Some(boxed) = cache.remove(&key)
            && let Some(old) = boxed.downcast_ref::<GrainHandle<G>>()
        {
            old.request_shutdown().await;
        }

        let handle = self.activate::<G>(id).await?;
        cache.insert(key, Box::new(handle.clone()));
        Ok(handle)
    }

    /// Bind and spawn a grain for `id`.
    async fn activate<G: Grain>(&self, id: &str) -> Result<GrainHandle<G>, GrainError> {
        tracing::debug!(
            grain_type = G::State::OWNER_TYPE,
            instance_id = %id,
            "activating grain"
        );

        let persistence = self
            .state_store
            .bind_with_events(G::State::OWNER_TYPE, id, G::fold)
            .await?;
        let config = GrainConfig {
            idle_timeout: self.idle_timeout,
        };
        Ok(spawn_grain::<G>(DomainObject::new(persistence), config))
    }

    /// Activate a bare domain object for `id` (snapshot-only, no actor).
    ///
    /// Always produces a fresh instance, loading persisted state when
    /// present and defaulting otherwise. Used by the replay runner, which
    /// receives events one at a time and folds them itself; sequential
    /// delivery is what makes the per-event rebinding safe.
    pub async fn create_object<S: DomainState>(
        &self,
        id: &str,
    ) -> Result<DomainObject<S>, PersistenceError> {
        let persistence = self.state_store.bind::<S>(S::OWNER_TYPE, id).await?;
        Ok(DomainObject::new(persistence))
    }

    /// Activate the domain object of a singleton-style aggregate.
    ///
    /// Loads state like [`create_object`](GrainStore::create_object); a
    /// never-written identity defaults to empty state rather than erroring,
    /// for every aggregate category.
    pub async fn get_single_object<S: DomainState>(
        &self,
        id: &str,
    ) -> Result<DomainObject<S>, PersistenceError> {
        let persistence = self.state_store.bind::<S>(S::OWNER_TYPE, id).await?;
        if persistence.version() == 0 {
            tracing::debug!(
                owner_type = S::OWNER_TYPE,
                instance_id = %id,
                "singleton has no persisted state, defaulting"
            );
        }
        Ok(DomainObject::new(persistence))
    }
}

/// Builder for configuring and opening a [`GrainStore`].
///
/// # Examples
///
/// ```
/// use grainstore::GrainStore;
///
/// let store = GrainStore::builder()
///     .base_dir("/tmp/my-app")
///     .build();
/// ```
pub struct GrainStoreBuilder {
    base_dir: Option<PathBuf>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    events: Option<Arc<dyn EventStore>>,
    idle_timeout: Duration,
}

impl GrainStoreBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            base_dir: None,
            snapshots: None,
            events: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Root directory for the default file-based snapshot store.
    ///
    /// Ignored when [`snapshot_store`](GrainStoreBuilder::snapshot_store)
    /// supplies an explicit backend. Defaults to a system temp directory.
    pub fn base_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.base_dir = Some(path.as_ref().to_owned());
        self
    }

    /// Use an explicit snapshot backend instead of the file-based default.
    pub fn snapshot_store(mut self, snapshots: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// Use an explicit event store backend. Defaults to an in-memory log.
    pub fn event_store(mut self, events: Arc<dyn EventStore>) -> Self {
        self.events = Some(events);
        self
    }

    /// Set the idle timeout for grain eviction.
    ///
    /// Grains that receive no messages for this duration deactivate; the
    /// next `get_single` call transparently re-activates from the
    /// snapshot. Defaults to 5 minutes.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Build the [`GrainStore`].
    pub fn build(self) -> GrainStore {
        let snapshots = self.snapshots.unwrap_or_else(|| {
            let base_dir = self
                .base_dir
                .unwrap_or_else(|| std::env::temp_dir().join("grainstore"));
            Arc::new(FsSnapshotStore::new(base_dir))
        });
        let events = self.events.unwrap_or_else(|| Arc::new(MemEventStore::new()));

        GrainStore {
            state_store: StateStore::new(snapshots, events),
            cache: Arc::new(RwLock::new(HashMap::new())),
            idle_timeout: self.idle_timeout,
        }
    }
}

impl Default for GrainStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grain::test_fixtures::{CounterGrain, CounterState};
    use crate::snapshot::MemSnapshotStore;

    fn mem_store(idle_timeout: Duration) -> (GrainStore, Arc<MemSnapshotStore>) {
        let snapshots = Arc::new(MemSnapshotStore::new());
        let store = GrainStore::builder()
            .snapshot_store(snapshots.clone())
            .idle_timeout(idle_timeout)
            .build();
        (store, snapshots)
    }

    #[tokio::test]
    async fn get_single_returns_the_same_live_grain() {
        let (store, _) = mem_store(Duration::from_secs(60));

        let h1 = store
            .get_single::<CounterGrain>("c-1")
            .await
            .expect("activation should succeed");
        h1.invoke(|g| g.increment()).await.unwrap().unwrap();

        // A second get_single reaches the same grain, not a fresh one.
        let h2 = store.get_single::<CounterGrain>("c-1").await.unwrap();
        let value = h2
            .invoke(|g| g.increment())
            .await
            .expect("grain alive")
            .expect("increment should succeed");
        assert_eq!(value, 2, "both handles must address one grain instance");
    }

    #[tokio::test]
    async fn identities_activate_independent_grains() {
        let (store, _) = mem_store(Duration::from_secs(60));

        let h1 = store.get_single::<CounterGrain>("c-1").await.unwrap();
        let h2 = store.get_single::<CounterGrain>("c-2").await.unwrap();

        h1.invoke(|g| g.increment()).await.unwrap().unwrap();
        let value = h2.invoke(|g| g.value()).await.unwrap();
        assert_eq!(value, 0, "distinct identities must not share state");
    }

    #[tokio::test]
    async fn evicted_grain_reactivates_with_identical_state() {
        let (store, _) = mem_store(Duration::from_millis(100));

        let handle = store.get_single::<CounterGrain>("c-1").await.unwrap();
        handle.invoke(|g| g.increment()).await.unwrap().unwrap();
        handle.invoke(|g| g.increment()).await.unwrap().unwrap();

        // Wait past the idle timeout so the grain deactivates.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!handle.is_alive(), "grain should be evicted when idle");

        // Transparent reactivation: same state as before eviction.
        let handle = store.get_single::<CounterGrain>("c-1").await.unwrap();
        let (value, version) = handle.invoke(|g| (g.value(), g.version())).await.unwrap();
        assert_eq!(value, 2);
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn create_displaces_the_cached_grain() {
        let (store, _) = mem_store(Duration::from_secs(60));

        let old = store.get_single::<CounterGrain>("c-1").await.unwrap();
        old.invoke(|g| g.increment()).await.unwrap().unwrap();

        let fresh = store.create::<CounterGrain>("c-1").await.unwrap();
        let value = fresh
            .invoke(|g| g.increment())
            .await
            .expect("fresh grain alive")
            .expect("increment should succeed");
        assert_eq!(value, 2, "fresh instance must load the persisted state");

        // The displaced grain drains and dies.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!old.is_alive(), "displaced grain should deactivate");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn create_displaces_a_grain_with_a_full_queue() {
        let (store, _) = mem_store(Duration::from_secs(60));
        let old = store.get_single::<CounterGrain>("c-1").await.unwrap();

        // Park the actor inside a callback so the queue backs up behind it.
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let parked = {
            let old = old.clone();
            tokio::spawn(async move {
                old.invoke(move |_| {
                    let _ = gate_rx.recv_timeout(Duration::from_secs(5));
                })
                .await
            })
        };

        // Fill every queue slot while the actor is parked.
        let mut pending = Vec::new();
        for _ in 0..32 {
            let old = old.clone();
            pending.push(tokio::spawn(async move { old.invoke(|g| g.value()).await }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Displace while the queue is full: the shutdown must still land.
        let displaced = {
            let store = store.clone();
            tokio::spawn(async move { store.create::<CounterGrain>("c-1").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate_tx.send(()).expect("actor should still be parked");

        let fresh = displaced
            .await
            .expect("task should not panic")
            .expect("create should succeed");
        let _ = parked.await;
        for job in pending {
            let _ = job.await;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(
            !old.is_alive(),
            "displaced grain must deactivate once its queue drains"
        );
        assert!(fresh.is_alive());
    }

    #[tokio::test]
    async fn create_object_always_returns_a_fresh_instance() {
        let (store, _) = mem_store(Duration::from_secs(60));

        let mut first = store.create_object::<CounterState>("c-1").await.unwrap();
        assert_eq!(first.version(), 0);
        first.update_state(CounterState { value: 9 });
        first.write_state(0).expect("write should succeed");

        let second = store.create_object::<CounterState>("c-1").await.unwrap();
        assert_eq!(second.state().value, 9);
        assert_eq!(second.version(), 1);
    }

    #[tokio::test]
    async fn get_single_object_defaults_when_never_written() {
        let (store, _) = mem_store(Duration::from_secs(60));
        let object = store
            .get_single_object::<CounterState>("missing")
            .await
            .expect("singleton lookup should not error");
        assert_eq!(object.state(), &CounterState::default());
        assert_eq!(object.version(), 0);
    }

    #[tokio::test]
    async fn one_write_per_mutation_through_the_grain() {
        let (store, snapshots) = mem_store(Duration::from_secs(60));

        let handle = store.get_single::<CounterGrain>("c-1").await.unwrap();
        handle.invoke(|g| g.increment()).await.unwrap().unwrap();
        handle.invoke(|g| g.increment()).await.unwrap().unwrap();
        handle.invoke(|g| g.value()).await.unwrap();

        assert_eq!(
            snapshots.write_count(),
            2,
            "two mutations, one write each; reads write nothing"
        );
    }
}
