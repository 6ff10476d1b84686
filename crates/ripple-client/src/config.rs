use std::path::PathBuf;

use anyhow::{Context, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// SQLite file backing the local reference store.
    pub db_path: PathBuf,
    /// Name of the channel whose messages are mirrored.
    pub channel: String,
    /// Create the default channels when missing.
    pub bootstrap: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db_path = lookup("RIPPLE_DB_PATH").unwrap_or_else(|| "ripple.db".into());
        let channel = lookup("RIPPLE_CHANNEL").unwrap_or_else(|| "public".into());
        let bootstrap = lookup("RIPPLE_BOOTSTRAP")
            .map(|v| v.parse::<bool>())
            .transpose()
            .context("RIPPLE_BOOTSTRAP must be true or false")?
            .unwrap_or(true);

        Ok(Self {
            db_path: PathBuf::from(db_path),
            channel,
            bootstrap,
        })
    }
}
