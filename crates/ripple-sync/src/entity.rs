use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use uuid::Uuid;

use ripple_types::events::Table;
use ripple_types::models::{Channel, Message, UserProfile};
use ripple_types::remote::{Filter, Query};

/// A row type that can be mirrored in a [`ReconcilingCollection`].
///
/// [`ReconcilingCollection`]: crate::ReconcilingCollection
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const TABLE: Table;

    /// Column that scopes live subscriptions, if the table is partitioned.
    const SCOPE_COLUMN: Option<&'static str> = None;

    fn id(&self) -> Uuid;

    /// Whether the row belongs in the externally visible collection.
    fn is_visible(&self) -> bool {
        true
    }

    /// Patch that logically deletes the row, for soft-deletable tables.
    fn soft_delete_patch(_now: DateTime<Utc>) -> Option<Value> {
        None
    }

    /// Snapshot query: creation order, scoped when a scope is given.
    fn snapshot_query(scope: Option<Uuid>) -> Query {
        let query = Query::new().order_by("created_at", true);
        match (Self::SCOPE_COLUMN, scope) {
            (Some(column), Some(id)) => query.filter(Filter::eq(column, id.to_string())),
            _ => query,
        }
    }
}

impl Entity for Channel {
    const TABLE: Table = Table::Channels;

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Entity for UserProfile {
    const TABLE: Table = Table::Profiles;

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Entity for Message {
    const TABLE: Table = Table::Messages;
    const SCOPE_COLUMN: Option<&'static str> = Some("channel_id");

    fn id(&self) -> Uuid {
        self.id
    }

    fn is_visible(&self) -> bool {
        self.deleted_at.is_none()
    }

    fn soft_delete_patch(now: DateTime<Utc>) -> Option<Value> {
        Some(json!({ "deleted_at": now }))
    }

    fn snapshot_query(scope: Option<Uuid>) -> Query {
        let query = Query::new()
            .filter(Filter::is_null("deleted_at"))
            .order_by("created_at", true);
        match scope {
            Some(channel_id) => query.filter(Filter::eq("channel_id", channel_id.to_string())),
            None => query,
        }
    }
}
