mod bootstrap;
mod config;

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use ripple_db::{Database, SqliteRemote};
use ripple_sync::{Channels, CollectionView, IdentityAdmin, Messages, Users};
use ripple_types::models::Message;
use ripple_types::remote::{RemoteClient, RemoteError};

use crate::config::Config;

/// Used when `RUST_LOG` is unset. Names every workspace crate that logs.
const DEFAULT_LOG_FILTER: &str = "ripple=debug,ripple_sync=debug,ripple_db=debug";

/// The local store has no identity provider attached.
struct NoIdentityProvider;

#[async_trait]
impl IdentityAdmin for NoIdentityProvider {
    async fn delete_identity(&self, id: Uuid) -> Result<(), RemoteError> {
        Err(RemoteError::Unavailable(format!(
            "no identity provider configured to remove {}",
            id
        )))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Database::open(&config.db_path)?;
    let remote: Arc<dyn RemoteClient> = Arc::new(SqliteRemote::new(db));

    let channels = Channels::new(remote.clone());
    channels.load().await?;
    if config.bootstrap {
        bootstrap::ensure_default_channels(&channels).await?;
    }

    let users = Users::new(remote.clone(), Arc::new(NoIdentityProvider));
    users.load().await?;

    let channel = channels
        .find_by_name(&config.channel)
        .ok_or_else(|| anyhow!("channel {} does not exist", config.channel))?;
    let messages = Messages::new(remote.clone());
    messages.load(channel.id).await?;

    info!(
        "Mirroring {} channels, {} users, {} messages in #{}",
        channels.items().len(),
        users.items().len(),
        messages.items().len(),
        channel.name
    );

    let mut channel_feed = channels.subscribe().await?;
    let mut user_feed = users.subscribe().await?;
    let mut message_feed = messages.subscribe(channel.id).await?;
    let mut message_view = messages.watch();

    tokio::select! {
        _ = channels.follow(&mut channel_feed) => info!("Channel feed ended"),
        _ = users.follow(&mut user_feed) => info!("User feed ended"),
        _ = messages.follow(&mut message_feed) => info!("Message feed ended"),
        _ = report(&mut message_view) => {},
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    message_feed.stop();
    user_feed.stop();
    channel_feed.stop();
    Ok(())
}

async fn report(view: &mut watch::Receiver<CollectionView<Message>>) {
    while view.changed().await.is_ok() {
        let current = view.borrow_and_update();
        if let Some(error) = &current.error {
            info!("Messages: {} visible, last error: {}", current.items.len(), error);
        } else {
            info!("Messages: {} visible", current.items.len());
        }
    }
}
