use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use ripple_types::api::{NewProfile, ProfilePatch};
use ripple_types::models::{Role, UserProfile};
use ripple_types::remote::{RemoteClient, RemoteError};

use crate::collection::ReconcilingCollection;
use crate::credentials;
use crate::entity::Entity;
use crate::error::{Result, SyncError};
use crate::subscription::LiveFeed;

/// Administrative side of the identity provider. Only removal is needed
/// here; sign-in and sessions live entirely outside this crate.
#[async_trait]
pub trait IdentityAdmin: Send + Sync {
    async fn delete_identity(&self, id: Uuid) -> std::result::Result<(), RemoteError>;
}

pub struct Users {
    collection: ReconcilingCollection<UserProfile>,
    identities: Arc<dyn IdentityAdmin>,
}

impl Users {
    pub fn new(remote: Arc<dyn RemoteClient>, identities: Arc<dyn IdentityAdmin>) -> Self {
        Self {
            collection: ReconcilingCollection::new(remote),
            identities,
        }
    }

    pub async fn load(&self) -> Result<usize> {
        self.collection.load(UserProfile::snapshot_query(None)).await
    }

    /// Create the profile for a freshly signed-up identity.
    pub async fn register(&self, id: Uuid, email: &str, username: &str) -> Result<UserProfile> {
        let payload = NewProfile {
            id,
            email: email.to_string(),
            username: username.to_string(),
            role: Role::User,
        };
        self.collection.insert_remote(&payload).await
    }

    pub async fn update(&self, id: Uuid, patch: &ProfilePatch) -> Result<UserProfile> {
        self.collection.update_remote(id, patch).await
    }

    /// Remove the identity, then its profile.
    ///
    /// Not atomic. Once the identity is gone that step stands even if the
    /// profile delete fails; the error is recorded and the profile stays
    /// in the collection.
    pub async fn delete_user(&self, id: Uuid) -> Result<()> {
        let _guard = self.collection.begin();
        if let Err(e) = self.identities.delete_identity(id).await {
            return Err(self.collection.fail(SyncError::Write(e)));
        }
        info!("Identity {} removed", id);

        self.collection
            .delete_remote(id)
            .await
            .inspect_err(|e| warn!("Identity {} removed but its profile remains: {}", id, e))
    }

    pub async fn subscribe(&self) -> Result<LiveFeed<UserProfile>> {
        self.collection.subscribe(None).await
    }

    pub fn find_by_username(&self, username: &str) -> Option<UserProfile> {
        self.collection
            .items()
            .into_iter()
            .find(|u| u.username == username)
    }

    /// See [`credentials::resolve_login_email`]. Failures are not recorded
    /// on the collection.
    pub async fn resolve_login_email(&self, login: &str) -> Result<String> {
        credentials::resolve_login_email(self.remote().as_ref(), login).await
    }
}

impl Deref for Users {
    type Target = ReconcilingCollection<UserProfile>;

    fn deref(&self) -> &Self::Target {
        &self.collection
    }
}
