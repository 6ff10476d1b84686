use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Remote tables mirrored by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Channels,
    Messages,
    Profiles,
    MessageEdits,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Channels => "channels",
            Self::Messages => "messages",
            Self::Profiles => "profiles",
            Self::MessageEdits => "message_edits",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

/// A row-level change notification as delivered by the backend.
///
/// `new_row` is set for inserts and updates, `old_row` for updates and
/// deletes. Delivery is at-least-once and unordered relative to the
/// receiving process's own writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    pub table: Table,
    pub operation: ChangeOperation,
    pub new_row: Option<Value>,
    pub old_row: Option<Value>,
}
