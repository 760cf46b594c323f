//! Grain actor loop: one queue-draining task per active identity.
//!
//! A grain is an identity-addressed, lazily activated wrapper enforcing
//! single-writer access to one aggregate's state. Each active grain runs
//! on its own task that drains an `mpsc` queue strictly in order, so all
//! state-mutating operations against one identity are serialized in issue
//! order while distinct identities make progress fully in parallel.
//!
//! Public API: [`Grain`] (implemented by grain types) and [`GrainHandle`]
//! (cloneable async handle). Activation and handle caching live in
//! [`GrainStore`](crate::GrainStore).

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::domain::{DomainObject, DomainState};
use crate::error::GrainError;
use crate::event::StoredEvent;

/// A virtual-actor grain owning one aggregate identity's state.
///
/// Implementors hold a [`DomainObject`] and expose domain operations as
/// ordinary methods; callers reach them through
/// [`GrainHandle::invoke`], which serializes access.
pub trait Grain: Send + 'static {
    /// The state type this grain materializes.
    type State: DomainState;

    /// Construct the grain around its freshly activated domain object.
    fn new(object: DomainObject<Self::State>) -> Self;

    /// Fold one stream event into the state during activation catch-up.
    ///
    /// The default ignores events; snapshot-only grains (like indexes)
    /// keep it. Event-sourced grains override it with their apply.
    fn fold(state: Self::State, _event: &StoredEvent) -> Self::State {
        state
    }
}

/// Configuration for the grain loop.
///
/// Internal to the crate -- callers configure the idle timeout through
/// [`GrainStoreBuilder::idle_timeout`](crate::GrainStoreBuilder::idle_timeout).
pub(crate) struct GrainConfig {
    /// How long the grain waits for a message before deactivating.
    pub idle_timeout: Duration,
}

/// Messages sent from [`GrainHandle`] to the grain loop.
pub(crate) enum GrainMessage<G> {
    /// Run a closure against the grain, replying through a captured
    /// `oneshot` sender.
    Invoke(Box<dyn FnOnce(&mut G) + Send>),

    /// Deactivate the grain. Queued operations ahead of this message
    /// still run; later ones fail with [`GrainError::Gone`].
    Shutdown,
}

/// Runs the grain loop until shutdown, channel closure, or idle timeout.
///
/// Messages are processed strictly sequentially; the single consumer is
/// what provides the single-writer guarantee for this identity.
async fn run_grain<G: Grain>(mut grain: G, mut rx: mpsc::Receiver<GrainMessage<G>>, config: GrainConfig) {
    loop {
        match tokio::time::timeout(config.idle_timeout, rx.recv()).await {
            Ok(Some(GrainMessage::Invoke(job))) => job(&mut grain),
            Ok(Some(GrainMessage::Shutdown)) => break,
            // Channel closed: all senders dropped.
            Ok(None) => break,
            // Idle timeout elapsed with no messages.
            Err(_elapsed) => {
                tracing::info!(
                    grain_type = G::State::OWNER_TYPE,
                    "grain idle, deactivating"
                );
                break;
            }
        }
    }
    // Loop exited. The next activation reloads state from the snapshot,
    // which is why eviction is observably transparent.
}

/// Spawn the grain loop for an activated domain object.
pub(crate) fn spawn_grain<G: Grain>(
    object: DomainObject<G::State>,
    config: GrainConfig,
) -> GrainHandle<G> {
    let grain = G::new(object);
    let (tx, rx) = mpsc::channel::<GrainMessage<G>>(32);
    tokio::spawn(run_grain(grain, rx, config));
    GrainHandle { sender: tx }
}

/// Async handle to a running grain.
///
/// Lightweight, cloneable, and `Send + Sync`. All operations issued
/// through any clone of the same handle are executed one at a time in the
/// order they are enqueued.
#[derive(Debug)]
pub struct GrainHandle<G> {
    pub(crate) sender: mpsc::Sender<GrainMessage<G>>,
}

// Manual `Clone` because `G` itself need not be `Clone` for the handle --
// we only clone the `Sender`, which is always `Clone` regardless of `G`.
impl<G> Clone for GrainHandle<G> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<G: Grain> GrainHandle<G> {
    /// Run `f` against the grain and wait for its result.
    ///
    /// # Errors
    ///
    /// Returns [`GrainError::Gone`] if the grain has deactivated. The
    /// caller should obtain a fresh handle from the store.
    pub async fn invoke<R, F>(&self, f: F) -> Result<R, GrainError>
    where
        F: FnOnce(&mut G) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Box<dyn FnOnce(&mut G) + Send> = Box::new(move |grain| {
            // If the receiver was dropped, the caller no longer cares
            // about the result. Silently discard it.
            let _ = tx.send(f(grain));
        });
        self.sender
            .send(GrainMessage::Invoke(job))
            .await
            .map_err(|_| GrainError::Gone)?;
        rx.await.map_err(|_| GrainError::Gone)
    }

    /// Check whether the grain backing this handle is still active.
    ///
    /// Returns `false` once the grain has deactivated (idle timeout or
    /// displacement). The store uses this to evict stale handles and
    /// re-activate on the next call.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Ask the grain to deactivate after draining already-queued work.
    ///
    /// Waits for a queue slot, so the request is never dropped when the
    /// queue is full. A send error means the grain already exited.
    pub(crate) async fn request_shutdown(&self) {
        let _ = self.sender.send(GrainMessage::Shutdown).await;
    }
}
