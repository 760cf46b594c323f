//! Snapshot + event-log persistence kernel with single-writer grains.
//!
//! `grainstore` provides the persistence and consistency layer of an
//! event-sourced system:
//!
//! - an append-only, globally ordered [`EventStore`] with push-based,
//!   type-filtered [`Subscription`]s (catch-up, then tailing);
//! - a [`StateStore`] binding aggregate identities to versioned snapshots
//!   with optimistic-concurrency writes;
//! - virtual-actor style grains ([`Grain`], [`GrainHandle`], [`GrainStore`])
//!   enforcing single-writer access per identity, with idle eviction and
//!   transparent reactivation;
//! - domain aggregates ([`AppState`], [`SchemaState`], [`ContentState`],
//!   [`AssetState`]) folding [`CoreEvent`]s through pure apply functions;
//! - the per-user [`AppsByUserIndex`] grain; and
//! - a [`ReplayRunner`] that rebuilds all snapshots from the full log,
//!   detecting completion by quiescence.
//!
//! # Example
//!
//! ```
//! use grainstore::{AppsByUserIndex, GrainStore};
//! use uuid::Uuid;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = tempfile::tempdir()?;
//! let store = GrainStore::builder().base_dir(dir.path()).build();
//!
//! let index = store.get_single::<AppsByUserIndex>("user-1").await?;
//! let app_id = Uuid::new_v4();
//! index.add(app_id).await?;
//! assert_eq!(index.list().await?, vec![app_id]);
//! # Ok(())
//! # }
//! ```

mod domain;
mod error;
mod event;
mod eventstore;
mod grain;
mod index;
mod model;
mod payload;
mod persistence;
mod replay;
mod snapshot;
mod store;
mod subscription;

pub use domain::{DomainObject, DomainState};
pub use error::{EventStoreError, GrainError, PersistenceError};
pub use event::{EventData, StoredEvent, TypeFilter, stream_uuid};
pub use eventstore::{EventStore, MemEventStore};
pub use grain::{Grain, GrainHandle};
pub use index::{AppIndexState, AppsByUserIndex};
pub use model::{
    AppState, AssetState, ContentState, FieldKind, FieldTypeResolver, SchemaField, SchemaState,
    StaticFieldRegistry,
};
pub use payload::{Category, CoreEvent};
pub use persistence::{Persistence, StateStore};
pub use replay::{ReplayConfig, ReplayReport, ReplayRunner};
pub use snapshot::{FsSnapshotStore, MemSnapshotStore, Snapshot, SnapshotStore};
pub use store::{GrainStore, GrainStoreBuilder};
pub use subscription::{EventSubscriber, Subscription};
