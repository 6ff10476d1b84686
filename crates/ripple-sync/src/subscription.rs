use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ripple_types::remote::{Filter, RawSubscription, RemoteClient};

use crate::entity::Entity;
use crate::error::{Result, SyncError};
use crate::normalize::{ChangeEvent, Normalizer};

/// Normalized events buffered between the forwarding task and the owner.
pub const SUBSCRIPTION_BUFFER: usize = 256;

/// Teardown capability for one live subscription. Cloneable; stopping is
/// idempotent and safe after the subscription has already ended.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    token: CancellationToken,
    finished: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            debug!("Stopping live subscription");
            self.token.cancel();
        }
    }

    /// True after an explicit stop.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// True once the forwarding task has exited, whether stopped or because
    /// the backend closed the stream.
    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    fn is_live(&self) -> bool {
        !self.is_stopped() && !self.is_finished()
    }

    fn finish(&self) {
        self.finished.cancel();
    }
}

/// Typed change events for one collection, in delivery order.
///
/// The owner drains the feed on its own schedule, so only the owner ever
/// mutates the collection. Dropping the feed stops the subscription.
pub struct LiveFeed<T> {
    events: mpsc::Receiver<ChangeEvent<T>>,
    stop: StopHandle,
    scope: Option<Uuid>,
}

impl<T> LiveFeed<T> {
    /// Next event, or `None` once the feed is stopped or the backend closed
    /// the stream. Buffered events are discarded after a stop but still
    /// delivered when the backend closed the stream.
    pub async fn next(&mut self) -> Option<ChangeEvent<T>> {
        tokio::select! {
            biased;
            _ = self.stop.token.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    /// Next event if one is already buffered.
    pub fn try_next(&mut self) -> Option<ChangeEvent<T>> {
        if self.stop.is_stopped() {
            return None;
        }
        self.events.try_recv().ok()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn scope(&self) -> Option<Uuid> {
        self.scope
    }
}

impl<T> fmt::Debug for LiveFeed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveFeed")
            .field("scope", &self.scope)
            .field("stopped", &self.stop.is_stopped())
            .finish()
    }
}

impl<T> Drop for LiveFeed<T> {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

/// Owns the single live subscription of one collection.
///
/// Changing scope (e.g. switching channels) is the caller's job: stop the
/// old subscription, then start a new one.
pub struct SubscriptionManager<T> {
    remote: Arc<dyn RemoteClient>,
    active: Mutex<Option<StopHandle>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> SubscriptionManager<T> {
    pub fn new(remote: Arc<dyn RemoteClient>) -> Self {
        Self {
            remote,
            active: Mutex::new(None),
            _entity: PhantomData,
        }
    }

    /// Open the subscription, scoped by `scope` when the entity's table is
    /// partitioned. Fails if a previous subscription was not stopped.
    pub async fn start(&self, scope: Option<Uuid>) -> Result<LiveFeed<T>> {
        let stop = StopHandle::default();
        {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if active.as_ref().is_some_and(StopHandle::is_live) {
                return Err(SyncError::AlreadySubscribed(T::TABLE));
            }
            // Reserve the slot before suspending.
            *active = Some(stop.clone());
        }

        let filter = match (T::SCOPE_COLUMN, scope) {
            (Some(column), Some(id)) => Some(Filter::eq(column, id.to_string())),
            _ => None,
        };
        let raw = match self.remote.subscribe(T::TABLE, filter).await {
            Ok(raw) => raw,
            Err(e) => {
                stop.stop();
                stop.finish();
                return Err(SyncError::Subscribe(e));
            }
        };

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(forward(
            self.remote.clone(),
            raw,
            Normalizer::<T>::new(scope),
            tx,
            stop.clone(),
        ));

        info!("Live subscription on {} started (scope {:?})", T::TABLE, scope);
        Ok(LiveFeed {
            events: rx,
            stop,
            scope,
        })
    }

    /// Stop the current subscription. No-op when none is open.
    pub fn stop(&self) {
        let current = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = current {
            handle.stop();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(StopHandle::is_live)
    }
}

/// Pump raw notifications through the normalizer into the bounded feed until
/// stopped or the backend closes the stream, then unsubscribe from the
/// backend exactly once.
async fn forward<T: Entity>(
    remote: Arc<dyn RemoteClient>,
    mut raw: RawSubscription,
    normalizer: Normalizer<T>,
    tx: mpsc::Sender<ChangeEvent<T>>,
    handle: StopHandle,
) {
    let token = &handle.token;
    loop {
        let change = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            change = raw.events.recv() => match change {
                Some(change) => change,
                None => break,
            },
        };

        let event = match normalizer.normalize(change) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping {} notification: {}", T::TABLE, e);
                continue;
            }
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            sent = tx.send(event) => if sent.is_err() { break },
        }
    }

    // Closing the sender lets the owner drain what is already buffered.
    drop(tx);
    remote.unsubscribe(raw.id).await;
    handle.finish();
    info!("Live subscription on {} stopped", T::TABLE);
}
