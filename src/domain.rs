//! Domain objects: typed state containers with version-guarded persistence.
//!
//! A [`DomainObject`] holds an immutable state value plus the number of
//! events folded into it. Pure `apply` transitions live on the concrete
//! state types (see the `model` module); the object only replaces state
//! wholesale ([`update_state`](DomainObject::update_state)) and persists it
//! conditioned on an expected version
//! ([`write_state`](DomainObject::write_state)).

use serde::{Serialize, de::DeserializeOwned};

use crate::error::PersistenceError;
use crate::persistence::Persistence;

/// State held by a domain object or grain.
///
/// The implementing type itself serves as the aggregate's state. A default
/// value represents a never-written aggregate.
pub trait DomainState:
    Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Identifies the owning aggregate type (e.g. `"app"`). Used as the
    /// snapshot directory name and for stream ID derivation.
    const OWNER_TYPE: &'static str;
}

/// A typed state container bound to one identity's persistence slot.
pub struct DomainObject<S: DomainState> {
    state: S,
    version: u64,
    persistence: Persistence<S>,
}

impl<S: DomainState> DomainObject<S> {
    /// Wrap a freshly bound [`Persistence`] handle, defaulting the state
    /// when the identity has never been written.
    pub fn new(mut persistence: Persistence<S>) -> Self {
        let state = persistence.take_state().unwrap_or_default();
        let version = persistence.version();
        Self {
            state,
            version,
            persistence,
        }
    }

    /// The current in-memory state.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Number of events folded into the current in-memory state.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The identity key this object is bound to.
    pub fn key(&self) -> &str {
        self.persistence.key()
    }

    /// Replace the in-memory state directly.
    ///
    /// Used by the replay runner to inject externally folded states rather
    /// than applying one event at a time. Does not touch the version or
    /// the persisted snapshot.
    pub fn update_state(&mut self, state: S) {
        self.state = state;
    }

    /// Persist the current in-memory state, conditioned on `expected`
    /// matching the persisted version.
    ///
    /// On success the snapshot is written at `max(version, expected + 1)`
    /// and both the in-memory and persisted versions advance to it: a
    /// plain snapshot mutation advances by one, while an object that has
    /// folded events past the snapshot persists at its folded version.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Conflict`] when `expected` differs from
    /// the persisted version; no write is performed and persisted state is
    /// unchanged.
    pub fn write_state(&mut self, expected: u64) -> Result<(), PersistenceError> {
        let actual = self.persistence.persisted_version();
        if expected != actual {
            return Err(PersistenceError::Conflict { expected, actual });
        }

        let new_version = self.version.max(expected + 1);
        self.persistence.write_snapshot(&self.state, new_version)?;
        self.version = new_version;
        Ok(())
    }
}
