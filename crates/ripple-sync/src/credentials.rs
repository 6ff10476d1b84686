use serde::Deserialize;

use ripple_types::events::Table;
use ripple_types::remote::{Filter, Query, RemoteClient};

use crate::error::{Result, SyncError};

#[derive(Deserialize)]
struct EmailRow {
    email: String,
}

/// Resolve what a user typed at login into the email the identity provider
/// expects. Anything containing `@` is taken as an email; everything else
/// is looked up as a username.
pub async fn resolve_login_email(remote: &dyn RemoteClient, login: &str) -> Result<String> {
    if login.contains('@') {
        return Ok(login.to_string());
    }

    let query = Query::new().filter(Filter::eq("username", login));
    let rows = remote
        .query(Table::Profiles, &query)
        .await
        .map_err(SyncError::Fetch)?;
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| SyncError::NotFound(format!("user {}", login)))?;

    let EmailRow { email } = serde_json::from_value(row)?;
    Ok(email)
}
