use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, trace};

use ripple_types::events::{RawChange, Table};
use ripple_types::remote::{Filter, RawSubscription, SubscriptionId};

/// Fans row changes out to live subscriptions.
#[derive(Clone, Default)]
pub struct ChangeFeed {
    inner: Arc<FeedInner>,
}

#[derive(Default)]
struct FeedInner {
    next_id: AtomicU64,

    /// subscription id -> subscriber
    subscribers: RwLock<HashMap<u64, Subscriber>>,
}

struct Subscriber {
    table: Table,
    filter: Option<Filter>,
    tx: mpsc::UnboundedSender<RawChange>,
}

impl Subscriber {
    fn wants(&self, change: &RawChange) -> bool {
        if self.table != change.table {
            return false;
        }
        let Some(filter) = &self.filter else {
            return true;
        };
        [&change.new_row, &change.old_row]
            .into_iter()
            .flatten()
            .any(|row| filter.matches(row))
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, table: Table, filter: Option<Filter>) -> RawSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .write()
            .await
            .insert(id, Subscriber { table, filter, tx });

        debug!("Subscription {} opened on {}", id, table);
        RawSubscription {
            id: SubscriptionId(id),
            events: rx,
        }
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) {
        if self.inner.subscribers.write().await.remove(&id.0).is_some() {
            debug!("Subscription {} closed", id.0);
        }
    }

    /// Deliver a change to every matching subscriber. Subscribers whose
    /// receiver is gone are dropped.
    pub async fn publish(&self, change: RawChange) {
        let mut closed = Vec::new();
        {
            let subscribers = self.inner.subscribers.read().await;
            for (id, sub) in subscribers.iter() {
                if sub.wants(&change) && sub.tx.send(change.clone()).is_err() {
                    closed.push(*id);
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.inner.subscribers.write().await;
            for id in closed {
                trace!("Pruning closed subscription {}", id);
                subscribers.remove(&id);
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().await.len()
    }
}
