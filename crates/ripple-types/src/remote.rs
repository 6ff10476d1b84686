//! Contract of the remote collection client. The engine only ever talks to
//! the backend through [`RemoteClient`].

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::events::{RawChange, Table};

/// A row as exchanged with the backend: a JSON object keyed by column.
pub type Row = Value;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("query failed: {0}")]
    Query(String),
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    IsNull(String),
    In(String, Vec<Value>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self::Eq(column.to_string(), value.into())
    }

    pub fn is_null(column: &str) -> Self {
        Self::IsNull(column.to_string())
    }

    pub fn is_in<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Self::In(column.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn column(&self) -> &str {
        match self {
            Self::Eq(c, _) | Self::IsNull(c) | Self::In(c, _) => c,
        }
    }

    /// Evaluate the filter against a JSON row. Missing columns count as null.
    pub fn matches(&self, row: &Value) -> bool {
        let field = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Self::Eq(_, v) => field == v,
            Self::IsNull(_) => field.is_null(),
            Self::In(_, vs) => vs.contains(field),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: uuid::Uuid) -> Self {
        Self::new().filter(Filter::eq("id", id.to_string()))
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// An open subscription. Notifications arrive on `events` until the
/// subscription is removed with [`RemoteClient::unsubscribe`].
#[derive(Debug)]
pub struct RawSubscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<RawChange>,
}

#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn query(&self, table: Table, query: &Query) -> Result<Vec<Row>, RemoteError>;

    /// Returns the canonical row with server-assigned fields populated.
    async fn insert(&self, table: Table, row: Row) -> Result<Row, RemoteError>;

    async fn update(&self, table: Table, id: &str, patch: Row) -> Result<Row, RemoteError>;

    async fn delete(&self, table: Table, id: &str) -> Result<(), RemoteError>;

    async fn subscribe(
        &self,
        table: Table,
        filter: Option<Filter>,
    ) -> Result<RawSubscription, RemoteError>;

    /// Removing an unknown or already removed subscription is a no-op.
    async fn unsubscribe(&self, id: SubscriptionId);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filters_treat_missing_columns_as_null() {
        let row = json!({ "id": "a", "channel_id": "c1" });
        assert!(Filter::eq("channel_id", "c1").matches(&row));
        assert!(!Filter::eq("channel_id", "c2").matches(&row));
        assert!(Filter::is_null("deleted_at").matches(&row));
        assert!(Filter::is_in("id", ["a", "b"]).matches(&row));
        assert!(!Filter::is_in("id", ["x"]).matches(&row));
    }
}
