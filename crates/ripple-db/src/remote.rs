use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use ripple_types::events::{ChangeOperation, RawChange, Table};
use ripple_types::remote::{
    Filter, Query, RawSubscription, RemoteClient, RemoteError, Row, SubscriptionId,
};

use crate::Database;
use crate::feed::ChangeFeed;

/// [`RemoteClient`] over a SQLite database. Every successful write is
/// published on the change feed after it commits, including rows removed
/// by a cascading delete.
#[derive(Clone)]
pub struct SqliteRemote {
    db: Arc<Database>,
    feed: ChangeFeed,
}

impl SqliteRemote {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            feed: ChangeFeed::new(),
        }
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Run blocking DB work off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<anyhow::Result<T>, RemoteError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db)).await.map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            RemoteError::Unavailable(e.to_string())
        })
    }
}

fn rejected(e: anyhow::Error) -> RemoteError {
    RemoteError::Rejected(format!("{:#}", e))
}

#[async_trait]
impl RemoteClient for SqliteRemote {
    async fn query(&self, table: Table, query: &Query) -> Result<Vec<Row>, RemoteError> {
        let query = query.clone();
        self.blocking(move |db| db.select_rows(table, &query))
            .await?
            .map_err(|e| RemoteError::Query(format!("{:#}", e)))
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, RemoteError> {
        let inserted = self
            .blocking(move |db| db.insert_row(table, &row))
            .await?
            .map_err(rejected)?;

        self.feed
            .publish(RawChange {
                table,
                operation: ChangeOperation::Insert,
                new_row: Some(inserted.clone()),
                old_row: None,
            })
            .await;
        Ok(inserted)
    }

    async fn update(&self, table: Table, id: &str, patch: Row) -> Result<Row, RemoteError> {
        let id = id.to_string();
        let (old, new) = self
            .blocking(move |db| db.update_row(table, &id, &patch))
            .await?
            .map_err(rejected)?;

        self.feed
            .publish(RawChange {
                table,
                operation: ChangeOperation::Update,
                new_row: Some(new.clone()),
                old_row: Some(old),
            })
            .await;
        Ok(new)
    }

    async fn delete(&self, table: Table, id: &str) -> Result<(), RemoteError> {
        let id = id.to_string();
        let removed = self
            .blocking(move |db| db.delete_row(table, &id))
            .await?
            .map_err(rejected)?;

        for (table, old) in removed {
            self.feed
                .publish(RawChange {
                    table,
                    operation: ChangeOperation::Delete,
                    new_row: None,
                    old_row: Some(old),
                })
                .await;
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        table: Table,
        filter: Option<Filter>,
    ) -> Result<RawSubscription, RemoteError> {
        Ok(self.feed.subscribe(table, filter).await)
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        self.feed.unsubscribe(id).await;
    }
}
