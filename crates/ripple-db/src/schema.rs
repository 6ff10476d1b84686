//! Column whitelist for every mirrored table. SQL is only ever built from
//! these names; anything else coming in through a filter, order or patch is
//! rejected.

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value;
use uuid::Uuid;

use ripple_types::events::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Uuid,
    Bool,
    Timestamp,
}

pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn col(name: &'static str, kind: ColumnKind) -> Column {
    Column { name, kind }
}

const CHANNELS: &[Column] = &[
    col("id", ColumnKind::Uuid),
    col("name", ColumnKind::Text),
    col("description", ColumnKind::Text),
    col("is_public", ColumnKind::Bool),
    col("created_at", ColumnKind::Timestamp),
];

const PROFILES: &[Column] = &[
    col("id", ColumnKind::Uuid),
    col("email", ColumnKind::Text),
    col("username", ColumnKind::Text),
    col("avatar_url", ColumnKind::Text),
    col("role", ColumnKind::Text),
    col("created_at", ColumnKind::Timestamp),
];

const MESSAGES: &[Column] = &[
    col("id", ColumnKind::Uuid),
    col("channel_id", ColumnKind::Uuid),
    col("sender_id", ColumnKind::Uuid),
    col("content", ColumnKind::Text),
    col("created_at", ColumnKind::Timestamp),
    col("updated_at", ColumnKind::Timestamp),
    col("deleted_at", ColumnKind::Timestamp),
];

const MESSAGE_EDITS: &[Column] = &[
    col("id", ColumnKind::Uuid),
    col("message_id", ColumnKind::Uuid),
    col("content", ColumnKind::Text),
    col("edited_by", ColumnKind::Uuid),
    col("edited_at", ColumnKind::Timestamp),
];

pub fn columns(table: Table) -> &'static [Column] {
    match table {
        Table::Channels => CHANNELS,
        Table::Profiles => PROFILES,
        Table::Messages => MESSAGES,
        Table::MessageEdits => MESSAGE_EDITS,
    }
}

pub fn column(table: Table, name: &str) -> Result<&'static Column> {
    columns(table)
        .iter()
        .find(|c| c.name == name)
        .ok_or_else(|| anyhow!("unknown column {}.{}", table, name))
}

/// Timestamp columns the server fills in on insert when the caller left
/// them out.
pub fn server_timestamps(table: Table) -> &'static [&'static str] {
    match table {
        Table::MessageEdits => &["edited_at"],
        _ => &["created_at"],
    }
}

/// Stored form of a timestamp. Fixed precision keeps text ordering equal to
/// time ordering.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn to_sql(column: &Column, value: &Value) -> Result<SqlValue> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }
    let converted = match (column.kind, value) {
        (ColumnKind::Text, Value::String(s)) => SqlValue::Text(s.clone()),
        (ColumnKind::Uuid, Value::String(s)) => {
            let id: Uuid = s
                .parse()
                .map_err(|e| anyhow!("invalid uuid for {}: {}", column.name, e))?;
            SqlValue::Text(id.to_string())
        }
        (ColumnKind::Bool, Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        (ColumnKind::Timestamp, Value::String(s)) => {
            let ts = s
                .parse::<DateTime<Utc>>()
                .map_err(|e| anyhow!("invalid timestamp for {}: {}", column.name, e))?;
            SqlValue::Text(format_timestamp(ts))
        }
        _ => bail!("type mismatch for column {}: {}", column.name, value),
    };
    Ok(converted)
}

pub fn to_json(column: &Column, value: ValueRef<'_>) -> Result<Value> {
    let json = match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) if column.kind == ColumnKind::Bool => Value::Bool(i != 0),
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8(t.to_vec())?),
        ValueRef::Blob(_) => bail!("unexpected blob in column {}", column.name),
    };
    Ok(json)
}
