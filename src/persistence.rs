//! State store binding: load-on-activate plus conditioned snapshot writes.
//!
//! [`StateStore`] composes a [`SnapshotStore`] and an [`EventStore`].
//! Binding to an identity loads the latest snapshot and, with
//! [`bind_with_events`](StateStore::bind_with_events), replays any stream
//! events recorded after it, so the caller ends up with the most current
//! state. The returned [`Persistence`] handle is the only path through
//! which domain objects write snapshots.

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};

use crate::error::PersistenceError;
use crate::event::{StoredEvent, stream_uuid};
use crate::eventstore::EventStore;
use crate::snapshot::{Snapshot, SnapshotStore};

/// Entry point for binding identities to their persisted state.
///
/// `Clone` is cheap -- both backends are `Arc`-wrapped.
#[derive(Clone)]
pub struct StateStore {
    snapshots: Arc<dyn SnapshotStore>,
    events: Arc<dyn EventStore>,
}

impl StateStore {
    /// Compose a state store from its two backends.
    pub fn new(snapshots: Arc<dyn SnapshotStore>, events: Arc<dyn EventStore>) -> Self {
        Self { snapshots, events }
    }

    /// The event store backend this state store reads catch-up events from.
    pub fn events(&self) -> Arc<dyn EventStore> {
        self.events.clone()
    }

    /// Bind to `(owner_type, key)`, loading the latest snapshot only.
    ///
    /// Reports "no state" (a handle with `state() == None` and version 0)
    /// when the identity has never been written. Used by the replay runner,
    /// which folds events itself.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Io`] on backend failure or
    /// [`PersistenceError::Codec`] if a stored snapshot does not decode
    /// into `S`.
    pub async fn bind<S>(
        &self,
        owner_type: &str,
        key: &str,
    ) -> Result<Persistence<S>, PersistenceError>
    where
        S: Serialize + DeserializeOwned,
    {
        let (state, version) = self.load_typed::<S>(owner_type, key)?;
        Ok(Persistence {
            snapshots: self.snapshots.clone(),
            owner_type: owner_type.to_owned(),
            key: key.to_owned(),
            state,
            version,
            persisted_version: version,
        })
    }

    /// Bind to `(owner_type, key)` and replay stream events recorded after
    /// the snapshot through `fold`.
    ///
    /// The handle's [`version`](Persistence::version) reflects the replayed
    /// events; [`persisted_version`](Persistence::persisted_version) stays at
    /// the snapshot's version until the next write.
    ///
    /// Concurrent binds to the same identity from two callers are not a
    /// supported usage pattern; the grain layer prevents that.
    pub async fn bind_with_events<S, F>(
        &self,
        owner_type: &str,
        key: &str,
        fold: F,
    ) -> Result<Persistence<S>, PersistenceError>
    where
        S: Serialize + DeserializeOwned + Default,
        F: Fn(S, &StoredEvent) -> S,
    {
        let (state, snapshot_version) = self.load_typed::<S>(owner_type, key)?;

        let stream_id = stream_uuid(owner_type, key).to_string();
        let tail = self
            .events
            .read_stream(&stream_id, snapshot_version)
            .await
            .map_err(|e| std::io::Error::other(format!("stream read failed: {e}")))?;

        let mut version = snapshot_version;
        let mut state = state;
        if !tail.is_empty() {
            let mut folded = state.take().unwrap_or_default();
            for event in &tail {
                folded = fold(folded, event);
                version += 1;
            }
            state = Some(folded);
            tracing::debug!(
                owner_type,
                key,
                replayed = tail.len(),
                version,
                "caught up from event stream"
            );
        }

        Ok(Persistence {
            snapshots: self.snapshots.clone(),
            owner_type: owner_type.to_owned(),
            key: key.to_owned(),
            state,
            version,
            persisted_version: snapshot_version,
        })
    }

    fn load_typed<S: DeserializeOwned>(
        &self,
        owner_type: &str,
        key: &str,
    ) -> Result<(Option<S>, u64), PersistenceError> {
        match self.snapshots.load(owner_type, key)? {
            Some(snapshot) => {
                let state: S = serde_json::from_value(snapshot.state)?;
                Ok((Some(state), snapshot.version))
            }
            None => Ok((None, 0)),
        }
    }
}

/// Handle to one identity's persisted snapshot slot.
///
/// Produced by [`StateStore::bind`] / [`StateStore::bind_with_events`].
/// Tracks the persisted version internally; every write is conditioned on
/// it, so a write raced past this handle by another writer fails with
/// [`PersistenceError::Conflict`].
pub struct Persistence<S> {
    snapshots: Arc<dyn SnapshotStore>,
    owner_type: String,
    key: String,
    state: Option<S>,
    version: u64,
    persisted_version: u64,
}

impl<S> Persistence<S>
where
    S: Serialize + DeserializeOwned,
{
    /// Take the loaded state out of the handle, or `None` when the identity
    /// has never been written.
    pub fn take_state(&mut self) -> Option<S> {
        self.state.take()
    }

    /// Number of events folded into the loaded state (snapshot version plus
    /// any events replayed at bind time).
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Version of the snapshot currently persisted (0 when none exists).
    pub fn persisted_version(&self) -> u64 {
        self.persisted_version
    }

    /// The identity key this handle is bound to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Persist `state` as the new snapshot at `new_version`, replacing the
    /// previous one.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Conflict`] if the persisted version no
    /// longer matches what this handle last observed; the stored snapshot
    /// is left unchanged.
    pub fn write_snapshot(&mut self, state: &S, new_version: u64) -> Result<(), PersistenceError> {
        let value = serde_json::to_value(state)?;
        self.snapshots.write(
            &self.owner_type,
            &self.key,
            &Snapshot {
                state: value,
                version: new_version,
            },
            self.persisted_version,
        )?;
        self.persisted_version = new_version;
        self.version = new_version;
        Ok(())
    }
}
