#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use ripple_db::{Database, SqliteRemote};
use ripple_sync::{ChangeEvent, LiveFeed};
use ripple_types::events::{RawChange, Table};
use ripple_types::remote::{
    Filter, Query, RawSubscription, RemoteClient, RemoteError, Row, SubscriptionId,
};

pub fn backend() -> SqliteRemote {
    SqliteRemote::new(Database::open_in_memory().unwrap())
}

pub fn shared(remote: &SqliteRemote) -> Arc<dyn RemoteClient> {
    Arc::new(remote.clone())
}

pub async fn seed_profile(remote: &SqliteRemote, username: &str) -> Uuid {
    let id = Uuid::new_v4();
    remote
        .insert(
            Table::Profiles,
            json!({
                "id": id.to_string(),
                "email": format!("{}@example.com", username),
                "username": username,
            }),
        )
        .await
        .unwrap();
    id
}

pub async fn seed_channel(remote: &SqliteRemote, name: &str) -> Uuid {
    let row = remote
        .insert(Table::Channels, json!({ "name": name, "is_public": true }))
        .await
        .unwrap();
    row["id"].as_str().unwrap().parse().unwrap()
}

pub async fn next_event<T>(feed: &mut LiveFeed<T>) -> ChangeEvent<T> {
    tokio::time::timeout(Duration::from_secs(2), feed.next())
        .await
        .expect("timed out waiting for change event")
        .expect("feed closed")
}

/// Delegates to a real backend but can be told to fail reads, or writes to
/// one table.
pub struct Flaky {
    pub inner: SqliteRemote,
    pub fail_reads: AtomicBool,
    pub fail_writes_to: Mutex<Option<Table>>,
}

impl Flaky {
    pub fn new(inner: SqliteRemote) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes_to: Mutex::new(None),
        })
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn reject_writes_to(&self, table: Option<Table>) {
        *self.fail_writes_to.lock().unwrap() = table;
    }

    fn check_write(&self, table: Table) -> Result<(), RemoteError> {
        if *self.fail_writes_to.lock().unwrap() == Some(table) {
            return Err(RemoteError::Rejected(format!("{} is read-only", table)));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteClient for Flaky {
    async fn query(&self, table: Table, query: &Query) -> Result<Vec<Row>, RemoteError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("network down".into()));
        }
        self.inner.query(table, query).await
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, RemoteError> {
        self.check_write(table)?;
        self.inner.insert(table, row).await
    }

    async fn update(&self, table: Table, id: &str, patch: Row) -> Result<Row, RemoteError> {
        self.check_write(table)?;
        self.inner.update(table, id, patch).await
    }

    async fn delete(&self, table: Table, id: &str) -> Result<(), RemoteError> {
        self.check_write(table)?;
        self.inner.delete(table, id).await
    }

    async fn subscribe(
        &self,
        table: Table,
        filter: Option<Filter>,
    ) -> Result<RawSubscription, RemoteError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RemoteError::Subscribe("realtime offline".into()));
        }
        self.inner.subscribe(table, filter).await
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.unsubscribe(id).await;
    }
}

/// Backend whose live stream delivers a fixed set of changes and then closes
/// from its side.
pub struct Closing {
    pub inner: SqliteRemote,
    pub changes: Mutex<Vec<RawChange>>,
    pub unsubscribed: AtomicUsize,
}

impl Closing {
    pub fn new(inner: SqliteRemote, changes: Vec<RawChange>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            changes: Mutex::new(changes),
            unsubscribed: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl RemoteClient for Closing {
    async fn query(&self, table: Table, query: &Query) -> Result<Vec<Row>, RemoteError> {
        self.inner.query(table, query).await
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, RemoteError> {
        self.inner.insert(table, row).await
    }

    async fn update(&self, table: Table, id: &str, patch: Row) -> Result<Row, RemoteError> {
        self.inner.update(table, id, patch).await
    }

    async fn delete(&self, table: Table, id: &str) -> Result<(), RemoteError> {
        self.inner.delete(table, id).await
    }

    async fn subscribe(
        &self,
        _table: Table,
        _filter: Option<Filter>,
    ) -> Result<RawSubscription, RemoteError> {
        let (tx, events) = mpsc::unbounded_channel();
        for change in self.changes.lock().unwrap().drain(..) {
            let _ = tx.send(change);
        }
        Ok(RawSubscription {
            id: SubscriptionId(1),
            events,
        })
    }

    async fn unsubscribe(&self, _id: SubscriptionId) {
        self.unsubscribed.fetch_add(1, Ordering::SeqCst);
    }
}
