use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ripple_types::remote::{Query, RemoteClient, Row};

use crate::entity::Entity;
use crate::error::{Result, SyncError};
use crate::normalize::{Change, ChangeEvent};
use crate::subscription::{LiveFeed, SubscriptionManager};

/// What the UI sees: visible items plus the loading/error signals.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionView<T> {
    pub items: Vec<T>,
    pub loading: bool,
    pub error: Option<String>,
}

struct State<T> {
    /// Every merged row, soft-deleted ones included.
    items: Vec<T>,
    in_flight: usize,
    error: Option<String>,
}

impl<T: Entity> State<T> {
    fn view(&self) -> CollectionView<T> {
        CollectionView {
            items: self.items.iter().filter(|e| e.is_visible()).cloned().collect(),
            loading: self.in_flight > 0,
            error: self.error.clone(),
        }
    }
}

/// A key-unique, ordered local mirror of one remote table.
///
/// Operations take `&self` and may be polled concurrently from one task; a
/// network result is applied to the state as it is when the call completes.
/// State is never locked across an await point.
pub struct ReconcilingCollection<T: Entity> {
    remote: Arc<dyn RemoteClient>,
    state: Mutex<State<T>>,
    view_tx: watch::Sender<CollectionView<T>>,
    subscriptions: SubscriptionManager<T>,
}

/// Marks an operation in flight. Dropping it (on any exit path, including
/// cancellation of the enclosing future) clears its share of `loading`.
pub(crate) struct InFlight<'a, T: Entity> {
    collection: &'a ReconcilingCollection<T>,
}

impl<T: Entity> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        self.collection.modify(|s| s.in_flight = s.in_flight.saturating_sub(1));
    }
}

impl<T: Entity> ReconcilingCollection<T> {
    pub fn new(remote: Arc<dyn RemoteClient>) -> Self {
        let state = State {
            items: Vec::new(),
            in_flight: 0,
            error: None,
        };
        let (view_tx, _) = watch::channel(state.view());
        Self {
            subscriptions: SubscriptionManager::new(remote.clone()),
            remote,
            state: Mutex::new(state),
            view_tx,
        }
    }

    // -- Observable state --

    /// Visible items in collection order.
    pub fn items(&self) -> Vec<T> {
        self.view_tx.borrow().items.clone()
    }

    /// Every merged row, including ones hidden from the visible view.
    pub fn all_items(&self) -> Vec<T> {
        self.lock().items.clone()
    }

    pub fn get(&self, id: Uuid) -> Option<T> {
        self.lock().items.iter().find(|e| e.id() == id).cloned()
    }

    pub fn loading(&self) -> bool {
        self.view_tx.borrow().loading
    }

    pub fn error(&self) -> Option<String> {
        self.view_tx.borrow().error.clone()
    }

    pub fn view(&self) -> CollectionView<T> {
        self.view_tx.borrow().clone()
    }

    /// Receiver that observes a fresh [`CollectionView`] after every change.
    pub fn watch(&self) -> watch::Receiver<CollectionView<T>> {
        self.view_tx.subscribe()
    }

    pub fn remote(&self) -> &Arc<dyn RemoteClient> {
        &self.remote
    }

    // -- Remote operations --

    /// Replace the whole collection with a fresh snapshot. On failure the
    /// previous items are kept.
    pub async fn load(&self, query: Query) -> Result<usize> {
        let _guard = self.begin();
        let rows = match self.remote.query(T::TABLE, &query).await {
            Ok(rows) => rows,
            Err(e) => return Err(self.fail(SyncError::Fetch(e))),
        };
        let items = self.decode_all(rows)?;
        Ok(self.replace_all(items))
    }

    /// Insert through the backend and merge the canonical row it returns.
    pub async fn insert_remote<P: Serialize + Sync>(&self, payload: &P) -> Result<T> {
        let _guard = self.begin();
        let row = self.encode(payload)?;
        let inserted = match self.remote.insert(T::TABLE, row).await {
            Ok(row) => self.decode(row)?,
            Err(e) => return Err(self.fail(SyncError::Write(e))),
        };
        // The stream may have echoed this row already.
        self.modify(|s| upsert(&mut s.items, inserted.clone()));
        Ok(inserted)
    }

    /// Update through the backend. The canonical row replaces the local one
    /// in place; if there is no local element the result is not merged.
    pub async fn update_remote<P: Serialize + Sync>(&self, id: Uuid, patch: &P) -> Result<T> {
        let _guard = self.begin();
        let patch = self.encode(patch)?;
        let updated = match self.remote.update(T::TABLE, &id.to_string(), patch).await {
            Ok(row) => self.decode(row)?,
            Err(e) => return Err(self.fail(SyncError::Write(e))),
        };
        self.replace_if_present(updated.clone());
        Ok(updated)
    }

    /// Delete through the backend (soft delete where the entity supports
    /// it), then drop the element locally.
    pub async fn delete_remote(&self, id: Uuid) -> Result<()> {
        let _guard = self.begin();
        let key = id.to_string();
        let outcome = match T::soft_delete_patch(Utc::now()) {
            Some(patch) => self.remote.update(T::TABLE, &key, patch).await.map(drop),
            None => self.remote.delete(T::TABLE, &key).await,
        };
        if let Err(e) = outcome {
            return Err(self.fail(SyncError::Write(e)));
        }
        self.modify(|s| remove(&mut s.items, id));
        Ok(())
    }

    // -- Live stream --

    /// Merge one change event. Idempotent under replay.
    pub fn apply_change_event(&self, event: ChangeEvent<T>) {
        debug!("Merging {} on {} ({})", kind(&event.change), event.table, event.change.id());
        self.modify(|s| merge(&mut s.items, event.change));
    }

    /// Open the live subscription for this collection.
    pub async fn subscribe(&self, scope: Option<Uuid>) -> Result<LiveFeed<T>> {
        self.subscriptions.start(scope).await.map_err(|e| self.fail(e))
    }

    /// Tear down the live subscription, if any. Safe to call repeatedly.
    pub fn unsubscribe(&self) {
        self.subscriptions.stop();
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscriptions.is_active()
    }

    /// Drain `feed` into the collection until it is stopped or closed.
    pub async fn follow(&self, feed: &mut LiveFeed<T>) {
        while let Some(event) = feed.next().await {
            self.apply_change_event(event);
        }
    }

    // -- Crate internals --

    pub(crate) fn begin(&self) -> InFlight<'_, T> {
        self.modify(|s| s.in_flight += 1);
        InFlight { collection: self }
    }

    /// Record an error on the collection and hand it back for returning.
    pub(crate) fn fail(&self, err: SyncError) -> SyncError {
        warn!("{} collection error: {}", T::TABLE, err);
        let message = err.to_string();
        self.modify(|s| s.error = Some(message));
        err
    }

    pub(crate) fn replace_all(&self, items: Vec<T>) -> usize {
        let count = items.len();
        self.modify(|s| {
            s.items = dedup(items);
            s.error = None;
        });
        info!("Loaded {} {} rows", count, T::TABLE);
        count
    }

    pub(crate) fn replace_if_present(&self, entity: T) -> bool {
        self.modify(|s| replace_existing(&mut s.items, entity))
    }

    pub(crate) fn decode(&self, row: Row) -> Result<T> {
        serde_json::from_value(row).map_err(|e| self.fail(e.into()))
    }

    pub(crate) fn decode_all(&self, rows: Vec<Row>) -> Result<Vec<T>> {
        rows.into_iter().map(|row| self.decode(row)).collect()
    }

    fn encode<P: Serialize>(&self, payload: &P) -> Result<Value> {
        serde_json::to_value(payload).map_err(|e| self.fail(e.into()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn modify<R>(&self, f: impl FnOnce(&mut State<T>) -> R) -> R {
        let mut state = self.lock();
        let out = f(&mut state);
        self.view_tx.send_replace(state.view());
        out
    }
}

fn kind<T>(change: &Change<T>) -> &'static str {
    match change {
        Change::Inserted(_) => "insert",
        Change::Updated(_) => "update",
        Change::Removed(_) => "remove",
    }
}

// -- Merge rules --

/// Apply a change to an ordered, key-unique list.
///
/// Inserts and updates are both upserts: an insert for a known identity is
/// the echo of a local write, an update for an unknown one means the insert
/// notification was missed. Visibility is not considered here.
pub(crate) fn merge<T: Entity>(items: &mut Vec<T>, change: Change<T>) {
    match change {
        Change::Inserted(entity) | Change::Updated(entity) => upsert(items, entity),
        Change::Removed(id) => {
            remove(items, id);
        }
    }
}

fn upsert<T: Entity>(items: &mut Vec<T>, entity: T) {
    if let Some(entity) = replace_or_return(items, entity) {
        items.push(entity);
    }
}

fn replace_existing<T: Entity>(items: &mut [T], entity: T) -> bool {
    replace_or_return(items, entity).is_none()
}

/// Replace the element with the same identity in place, or give the entity
/// back if there is none.
fn replace_or_return<T: Entity>(items: &mut [T], entity: T) -> Option<T> {
    match items.iter_mut().find(|e| e.id() == entity.id()) {
        Some(slot) => {
            *slot = entity;
            None
        }
        None => Some(entity),
    }
}

/// Filter by identity rather than index; positions may have shifted since
/// the caller last looked.
fn remove<T: Entity>(items: &mut Vec<T>, id: Uuid) -> bool {
    let before = items.len();
    items.retain(|e| e.id() != id);
    items.len() != before
}

/// Snapshots are trusted to be key-unique, but a duplicate must not break the
/// invariant. Later rows win, keeping the first position.
fn dedup<T: Entity>(items: Vec<T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        upsert(&mut out, item);
    }
    out
}
