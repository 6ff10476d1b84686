use std::ops::Deref;
use std::sync::Arc;

use uuid::Uuid;

use ripple_types::api::{ChannelPatch, NewChannel};
use ripple_types::models::Channel;
use ripple_types::remote::RemoteClient;

use crate::collection::ReconcilingCollection;
use crate::entity::Entity;
use crate::error::Result;
use crate::subscription::LiveFeed;

pub struct Channels {
    collection: ReconcilingCollection<Channel>,
}

impl Channels {
    pub fn new(remote: Arc<dyn RemoteClient>) -> Self {
        Self {
            collection: ReconcilingCollection::new(remote),
        }
    }

    /// All channels, oldest first.
    pub async fn load(&self) -> Result<usize> {
        self.collection.load(Channel::snapshot_query(None)).await
    }

    pub async fn create(
        &self,
        name: &str,
        description: Option<&str>,
        is_public: bool,
    ) -> Result<Channel> {
        let payload = NewChannel {
            name: name.to_string(),
            description: description.map(str::to_string),
            is_public,
        };
        self.collection.insert_remote(&payload).await
    }

    pub async fn update(&self, id: Uuid, patch: &ChannelPatch) -> Result<Channel> {
        self.collection.update_remote(id, patch).await
    }

    pub async fn remove(&self, id: Uuid) -> Result<()> {
        self.collection.delete_remote(id).await
    }

    pub async fn subscribe(&self) -> Result<LiveFeed<Channel>> {
        self.collection.subscribe(None).await
    }

    pub fn find_by_name(&self, name: &str) -> Option<Channel> {
        self.collection.items().into_iter().find(|c| c.name == name)
    }
}

impl Deref for Channels {
    type Target = ReconcilingCollection<Channel>;

    fn deref(&self) -> &Self::Target {
        &self.collection
    }
}
