//! Apps-by-user index grain.
//!
//! One grain instance per user holds the ordered set of app IDs that user
//! contributes to. The index is snapshot-only state keyed by the user ID;
//! it emits no events of its own. Every mutating operation performs
//! exactly one snapshot write, whether or not membership changed, so
//! callers can rely on the index being persisted once the call returns.

use uuid::Uuid;

use crate::domain::{DomainObject, DomainState};
use crate::error::{GrainError, PersistenceError};
use crate::grain::{Grain, GrainHandle};

/// Persisted state of one user's app index: app IDs in insertion order.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AppIndexState {
    pub app_ids: Vec<Uuid>,
}

impl DomainState for AppIndexState {
    const OWNER_TYPE: &'static str = "apps-by-user";
}

/// Grain maintaining the ordered set of apps for one user.
pub struct AppsByUserIndex {
    object: DomainObject<AppIndexState>,
}

impl Grain for AppsByUserIndex {
    type State = AppIndexState;

    fn new(object: DomainObject<AppIndexState>) -> Self {
        Self { object }
    }
}

impl AppsByUserIndex {
    /// Add `app_id` to the index.
    ///
    /// Adding an ID that is already present keeps the membership unchanged
    /// but still persists, so the write always lands.
    pub fn add(&mut self, app_id: Uuid) -> Result<(), PersistenceError> {
        let mut next = self.object.state().clone();
        if !next.app_ids.contains(&app_id) {
            next.app_ids.push(app_id);
        }
        self.commit(next)
    }

    /// Remove `app_id` from the index. Removing an absent ID is not an
    /// error; the write is performed either way.
    pub fn remove(&mut self, app_id: Uuid) -> Result<(), PersistenceError> {
        let mut next = self.object.state().clone();
        next.app_ids.retain(|id| *id != app_id);
        self.commit(next)
    }

    /// Replace the whole index with `app_ids`, in one write.
    ///
    /// Used when rebuilding the index from the event log; duplicates in
    /// the input are collapsed, first occurrence wins.
    pub fn rebuild(&mut self, app_ids: Vec<Uuid>) -> Result<(), PersistenceError> {
        let mut deduped = Vec::with_capacity(app_ids.len());
        for id in app_ids {
            if !deduped.contains(&id) {
                deduped.push(id);
            }
        }
        self.commit(AppIndexState { app_ids: deduped })
    }

    /// The app IDs currently in the index, in insertion order. Performs no
    /// write.
    pub fn list(&self) -> Vec<Uuid> {
        self.object.state().app_ids.clone()
    }

    fn commit(&mut self, next: AppIndexState) -> Result<(), PersistenceError> {
        self.object.update_state(next);
        self.object.write_state(self.object.version())
    }
}

/// Typed async surface over an index grain handle.
impl GrainHandle<AppsByUserIndex> {
    pub async fn add(&self, app_id: Uuid) -> Result<(), GrainError> {
        self.invoke(move |g| g.add(app_id)).await?.map_err(Into::into)
    }

    pub async fn remove(&self, app_id: Uuid) -> Result<(), GrainError> {
        self.invoke(move |g| g.remove(app_id)).await?.map_err(Into::into)
    }

    pub async fn rebuild(&self, app_ids: Vec<Uuid>) -> Result<(), GrainError> {
        self.invoke(move |g| g.rebuild(app_ids)).await?.map_err(Into::into)
    }

    pub async fn list(&self) -> Result<Vec<Uuid>, GrainError> {
        self.invoke(|g| g.list()).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::snapshot::MemSnapshotStore;
    use crate::store::GrainStore;

    fn index_store() -> (GrainStore, Arc<MemSnapshotStore>) {
        let snapshots = Arc::new(MemSnapshotStore::new());
        let store = GrainStore::builder()
            .snapshot_store(snapshots.clone())
            .idle_timeout(Duration::from_secs(60))
            .build();
        (store, snapshots)
    }

    #[tokio::test]
    async fn add_and_list_preserve_insertion_order() {
        let (store, snapshots) = index_store();
        let index = store.get_single::<AppsByUserIndex>("user-1").await.unwrap();

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        index.add(first).await.unwrap();
        index.add(second).await.unwrap();

        assert_eq!(index.list().await.unwrap(), vec![first, second]);
        assert_eq!(snapshots.write_count(), 2, "one write per add");
    }

    #[tokio::test]
    async fn duplicate_add_keeps_membership_but_still_writes() {
        let (store, snapshots) = index_store();
        let index = store.get_single::<AppsByUserIndex>("user-1").await.unwrap();

        let app = Uuid::new_v4();
        index.add(app).await.unwrap();
        index.add(app).await.unwrap();

        assert_eq!(index.list().await.unwrap(), vec![app]);
        assert_eq!(snapshots.write_count(), 2, "duplicate add still persists");
    }

    #[tokio::test]
    async fn remove_drops_the_app() {
        let (store, snapshots) = index_store();
        let index = store.get_single::<AppsByUserIndex>("user-1").await.unwrap();

        let keep = Uuid::new_v4();
        let drop = Uuid::new_v4();
        index.add(keep).await.unwrap();
        index.add(drop).await.unwrap();
        index.remove(drop).await.unwrap();

        assert_eq!(index.list().await.unwrap(), vec![keep]);
        assert_eq!(snapshots.write_count(), 3, "one write per mutation");
    }

    #[tokio::test]
    async fn remove_absent_app_is_not_an_error() {
        let (store, snapshots) = index_store();
        let index = store.get_single::<AppsByUserIndex>("user-1").await.unwrap();

        index.remove(Uuid::new_v4()).await.unwrap();

        assert!(index.list().await.unwrap().is_empty());
        assert_eq!(snapshots.write_count(), 1, "the write still lands");
    }

    #[tokio::test]
    async fn rebuild_replaces_everything_in_one_write() {
        let (store, snapshots) = index_store();
        let index = store.get_single::<AppsByUserIndex>("user-1").await.unwrap();

        index.add(Uuid::new_v4()).await.unwrap();
        index.add(Uuid::new_v4()).await.unwrap();

        let rebuilt = vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        index.rebuild(rebuilt.clone()).await.unwrap();

        assert_eq!(index.list().await.unwrap(), rebuilt);
        assert_eq!(snapshots.write_count(), 3, "rebuild is one write");
    }

    #[tokio::test]
    async fn rebuild_twice_with_the_same_input_is_idempotent() {
        let (store, snapshots) = index_store();
        let index = store.get_single::<AppsByUserIndex>("user-1").await.unwrap();

        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        index.rebuild(ids.clone()).await.unwrap();
        index.rebuild(ids.clone()).await.unwrap();

        assert_eq!(index.list().await.unwrap(), ids);
        assert_eq!(snapshots.write_count(), 2, "each rebuild is still one write");
    }

    #[tokio::test]
    async fn rebuild_collapses_duplicates() {
        let (store, _) = index_store();
        let index = store.get_single::<AppsByUserIndex>("user-1").await.unwrap();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        index.rebuild(vec![a, b, a]).await.unwrap();

        assert_eq!(index.list().await.unwrap(), vec![a, b]);
    }

    #[tokio::test]
    async fn list_performs_no_write() {
        let (store, snapshots) = index_store();
        let index = store.get_single::<AppsByUserIndex>("user-1").await.unwrap();

        index.add(Uuid::new_v4()).await.unwrap();
        index.list().await.unwrap();
        index.list().await.unwrap();

        assert_eq!(snapshots.write_count(), 1, "reads must not write");
    }

    #[tokio::test]
    async fn index_survives_deactivation() {
        let snapshots = Arc::new(MemSnapshotStore::new());
        let store = GrainStore::builder()
            .snapshot_store(snapshots)
            .idle_timeout(Duration::from_millis(100))
            .build();

        let app = Uuid::new_v4();
        let index = store.get_single::<AppsByUserIndex>("user-1").await.unwrap();
        index.add(app).await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!index.is_alive());

        let index = store.get_single::<AppsByUserIndex>("user-1").await.unwrap();
        assert_eq!(index.list().await.unwrap(), vec![app]);
    }

    #[tokio::test]
    async fn users_have_independent_indexes() {
        let (store, _) = index_store();
        let first = store.get_single::<AppsByUserIndex>("user-1").await.unwrap();
        let second = store.get_single::<AppsByUserIndex>("user-2").await.unwrap();

        let app = Uuid::new_v4();
        first.add(app).await.unwrap();

        assert!(second.list().await.unwrap().is_empty());
    }
}
