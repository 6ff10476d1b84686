use std::marker::PhantomData;

use serde_json::Value;
use uuid::Uuid;

use ripple_types::events::{ChangeOperation, RawChange, Table};

use crate::entity::Entity;
use crate::error::{Result, SyncError};

/// A typed change to one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<T> {
    Inserted(T),
    Updated(T),
    Removed(Uuid),
}

impl<T: Entity> Change<T> {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Inserted(e) | Self::Updated(e) => e.id(),
            Self::Removed(id) => *id,
        }
    }
}

/// A change tagged with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent<T> {
    pub table: Table,
    /// Scope of the subscription that delivered the event (the channel, for
    /// messages).
    pub scope: Option<Uuid>,
    pub change: Change<T>,
}

/// Turns raw notifications into [`ChangeEvent`]s. Every notification handed
/// to a normalizer is assumed to belong to its subscription; filtering
/// happens in the backend.
pub struct Normalizer<T> {
    scope: Option<Uuid>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Normalizer<T> {
    pub fn new(scope: Option<Uuid>) -> Self {
        Self {
            scope,
            _entity: PhantomData,
        }
    }

    pub fn normalize(&self, raw: RawChange) -> Result<ChangeEvent<T>> {
        let change = match raw.operation {
            ChangeOperation::Insert => Change::Inserted(decode(raw.new_row)?),
            ChangeOperation::Update => Change::Updated(decode(raw.new_row)?),
            // Only the identity of the old row is kept.
            ChangeOperation::Delete => Change::Removed(old_id(raw.old_row.as_ref())?),
        };

        Ok(ChangeEvent {
            table: raw.table,
            scope: self.scope,
            change,
        })
    }
}

fn decode<T: Entity>(row: Option<Value>) -> Result<T> {
    let row = row.ok_or_else(|| SyncError::Malformed("missing new row".into()))?;
    Ok(serde_json::from_value(row)?)
}

fn old_id(row: Option<&Value>) -> Result<Uuid> {
    row.and_then(|r| r.get("id"))
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::Malformed("delete without old row id".into()))?
        .parse()
        .map_err(|e| SyncError::Malformed(format!("bad old row id: {}", e)))
}
