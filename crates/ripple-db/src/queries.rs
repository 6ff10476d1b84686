use anyhow::{Result, anyhow, bail};
use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params_from_iter};
use serde_json::{Map, Value};
use uuid::Uuid;

use ripple_types::events::Table;
use ripple_types::remote::{Filter, Query};

use crate::Database;
use crate::schema::{self, columns, format_timestamp};

impl Database {
    pub fn select_rows(&self, table: Table, query: &Query) -> Result<Vec<Value>> {
        self.with_conn(|conn| query_rows(conn, table, query))
    }

    /// Insert a row and return its canonical form. `id` and the server
    /// timestamps are assigned when absent.
    pub fn insert_row(&self, table: Table, row: &Value) -> Result<Value> {
        let mut fields = as_object(row)?.clone();
        fields
            .entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        for name in schema::server_timestamps(table) {
            if fields.get(*name).is_none_or(Value::is_null) {
                fields.insert(name.to_string(), Value::String(format_timestamp(Utc::now())));
            }
        }
        let id = fields
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("id must be a string"))?
            .to_string();

        let mut names = Vec::with_capacity(fields.len());
        let mut params = Vec::with_capacity(fields.len());
        for (name, value) in &fields {
            let column = schema::column(table, name)?;
            names.push(column.name);
            params.push(schema::to_sql(column, value)?);
        }
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            names.join(", "),
            placeholders.join(", ")
        );

        self.with_conn(|conn| {
            conn.execute(&sql, params_from_iter(params))?;
            query_row_by_id(conn, table, &id)?
                .ok_or_else(|| anyhow!("inserted row {} vanished", id))
        })
    }

    /// Apply a patch. Returns `(old, new)` so the caller can publish both.
    pub fn update_row(&self, table: Table, id: &str, patch: &Value) -> Result<(Value, Value)> {
        let fields = as_object(patch)?;
        if fields.is_empty() {
            bail!("empty patch for {} {}", table, id);
        }

        let mut assignments = Vec::with_capacity(fields.len());
        let mut params = Vec::with_capacity(fields.len() + 1);
        for (i, (name, value)) in fields.iter().enumerate() {
            if name == "id" {
                bail!("id of {} rows is immutable", table);
            }
            let column = schema::column(table, name)?;
            assignments.push(format!("{} = ?{}", column.name, i + 1));
            params.push(schema::to_sql(column, value)?);
        }
        params.push(SqlValue::Text(id.to_string()));
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?{}",
            table,
            assignments.join(", "),
            params.len()
        );

        self.with_conn(|conn| {
            let old = query_row_by_id(conn, table, id)?
                .ok_or_else(|| anyhow!("no {} row with id {}", table, id))?;
            conn.execute(&sql, params_from_iter(params))?;
            let new = query_row_by_id(conn, table, id)?
                .ok_or_else(|| anyhow!("updated row {} vanished", id))?;
            Ok((old, new))
        })
    }

    /// Delete a row. Returns every removed row: rows taken with it by
    /// `ON DELETE CASCADE` first, deepest first, the row itself last.
    /// Empty if it did not exist.
    pub fn delete_row(&self, table: Table, id: &str) -> Result<Vec<(Table, Value)>> {
        self.with_conn(|conn| {
            let Some(old) = query_row_by_id(conn, table, id)? else {
                return Ok(Vec::new());
            };
            let mut removed = Vec::new();
            collect_dependents(conn, table, id, &mut removed)?;
            conn.execute(&format!("DELETE FROM {} WHERE id = ?1", table), [id])?;
            removed.push((table, old));
            Ok(removed)
        })
    }
}

/// Rows that cascade from deleting `id` in `table`.
fn collect_dependents(
    conn: &Connection,
    table: Table,
    id: &str,
    out: &mut Vec<(Table, Value)>,
) -> Result<()> {
    let (child, column) = match table {
        Table::Channels => (Table::Messages, "channel_id"),
        Table::Messages => (Table::MessageEdits, "message_id"),
        Table::Profiles | Table::MessageEdits => return Ok(()),
    };
    let rows = query_rows(conn, child, &Query::new().filter(Filter::eq(column, id)))?;
    for row in rows {
        if let Some(child_id) = row.get("id").and_then(Value::as_str) {
            collect_dependents(conn, child, child_id, out)?;
        }
        out.push((child, row));
    }
    Ok(())
}

fn as_object(row: &Value) -> Result<&Map<String, Value>> {
    row.as_object().ok_or_else(|| anyhow!("row must be a JSON object"))
}

fn query_row_by_id(conn: &Connection, table: Table, id: &str) -> Result<Option<Value>> {
    let query = Query::new().filter(Filter::eq("id", id));
    Ok(query_rows(conn, table, &query)?.into_iter().next())
}

fn query_rows(conn: &Connection, table: Table, query: &Query) -> Result<Vec<Value>> {
    let cols = columns(table);
    let mut sql = format!(
        "SELECT {} FROM {}",
        cols.iter().map(|c| c.name).collect::<Vec<_>>().join(", "),
        table
    );

    let mut clauses = Vec::with_capacity(query.filters.len());
    let mut params: Vec<SqlValue> = Vec::new();
    for filter in &query.filters {
        let column = schema::column(table, filter.column())?;
        let clause = match filter {
            Filter::Eq(_, value) => {
                params.push(schema::to_sql(column, value)?);
                format!("{} = ?{}", column.name, params.len())
            }
            Filter::IsNull(_) => format!("{} IS NULL", column.name),
            Filter::In(_, values) if values.is_empty() => "0".to_string(),
            Filter::In(_, values) => {
                let mut placeholders = Vec::with_capacity(values.len());
                for value in values {
                    params.push(schema::to_sql(column, value)?);
                    placeholders.push(format!("?{}", params.len()));
                }
                format!("{} IN ({})", column.name, placeholders.join(", "))
            }
        };
        clauses.push(clause);
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    if let Some(order) = &query.order {
        let column = schema::column(table, &order.column)?;
        let direction = if order.ascending { "ASC" } else { "DESC" };
        sql.push_str(&format!(" ORDER BY {} {}, id {}", column.name, direction, direction));
    }

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut object = Map::with_capacity(cols.len());
        for (i, column) in cols.iter().enumerate() {
            object.insert(column.name.to_string(), schema::to_json(column, row.get_ref(i)?)?);
        }
        out.push(Value::Object(object));
    }

    Ok(out)
}
