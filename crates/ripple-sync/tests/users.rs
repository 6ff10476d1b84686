mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use ripple_sync::{IdentityAdmin, Messages, SyncError, Users};
use ripple_types::api::ProfilePatch;
use ripple_types::events::Table;
use ripple_types::models::Role;
use ripple_types::remote::{Query, RemoteClient, RemoteError};

use common::{backend, seed_channel, shared};

#[derive(Default)]
struct Identities {
    removed: Mutex<Vec<Uuid>>,
    refuse: bool,
}

#[async_trait]
impl IdentityAdmin for Identities {
    async fn delete_identity(&self, id: Uuid) -> Result<(), RemoteError> {
        if self.refuse {
            return Err(RemoteError::Rejected("not an admin".into()));
        }
        self.removed.lock().unwrap().push(id);
        Ok(())
    }
}

#[tokio::test]
async fn register_creates_a_plain_user() {
    let remote = backend();
    let users = Users::new(shared(&remote), Arc::new(Identities::default()));

    let id = Uuid::new_v4();
    let profile = users.register(id, "ann@example.com", "ann").await.unwrap();
    assert_eq!(profile.id, id);
    assert_eq!(profile.role, Role::User);
    assert_eq!(users.find_by_username("ann").unwrap(), profile);
}

#[tokio::test]
async fn update_changes_role_in_place() {
    let remote = backend();
    let users = Users::new(shared(&remote), Arc::new(Identities::default()));
    let ann = users.register(Uuid::new_v4(), "ann@example.com", "ann").await.unwrap();
    users.register(Uuid::new_v4(), "bob@example.com", "bob").await.unwrap();

    let patch = ProfilePatch {
        role: Some(Role::Admin),
        ..Default::default()
    };
    users.update(ann.id, &patch).await.unwrap();
    let items = users.items();
    assert_eq!(items[0].role, Role::Admin);
    assert_eq!(items[1].username, "bob");
}

#[tokio::test]
async fn delete_removes_identity_then_profile() {
    let remote = backend();
    let identities = Arc::new(Identities::default());
    let users = Users::new(shared(&remote), identities.clone());
    let ann = users.register(Uuid::new_v4(), "ann@example.com", "ann").await.unwrap();

    users.delete_user(ann.id).await.unwrap();
    assert_eq!(*identities.removed.lock().unwrap(), vec![ann.id]);
    assert!(users.items().is_empty());
    let rows = remote.query(Table::Profiles, &Query::by_id(ann.id)).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn refused_identity_removal_touches_nothing() {
    let remote = backend();
    let identities = Arc::new(Identities {
        refuse: true,
        ..Default::default()
    });
    let users = Users::new(shared(&remote), identities);
    let ann = users.register(Uuid::new_v4(), "ann@example.com", "ann").await.unwrap();

    assert!(matches!(users.delete_user(ann.id).await, Err(SyncError::Write(_))));
    assert_eq!(users.items().len(), 1);
    assert!(users.error().unwrap().contains("not an admin"));
    assert!(!users.loading());
}

#[tokio::test]
async fn profile_failure_after_identity_removal_is_tolerated() {
    let remote = backend();
    let identities = Arc::new(Identities::default());
    let users = Users::new(shared(&remote), identities.clone());
    let ann = users.register(Uuid::new_v4(), "ann@example.com", "ann").await.unwrap();

    // A message still references the profile, so the profile delete is
    // rejected by the foreign key.
    let channel = seed_channel(&remote, "public").await;
    Messages::new(shared(&remote))
        .send_message(channel, "still here", ann.id)
        .await
        .unwrap();

    assert!(users.delete_user(ann.id).await.is_err());
    assert_eq!(*identities.removed.lock().unwrap(), vec![ann.id]);
    assert_eq!(users.items().len(), 1);
    assert!(users.error().is_some());
}

#[tokio::test]
async fn login_names_resolve_to_emails() {
    let remote = backend();
    let users = Users::new(shared(&remote), Arc::new(Identities::default()));
    users.register(Uuid::new_v4(), "ann@example.com", "ann").await.unwrap();

    assert_eq!(users.resolve_login_email("x@y.z").await.unwrap(), "x@y.z");
    assert_eq!(users.resolve_login_email("ann").await.unwrap(), "ann@example.com");
    assert!(matches!(
        users.resolve_login_email("nobody").await,
        Err(SyncError::NotFound(_))
    ));
}

#[tokio::test]
async fn live_profile_changes_are_merged() {
    let remote = backend();
    let ours = Users::new(shared(&remote), Arc::new(Identities::default()));
    let theirs = Users::new(shared(&remote), Arc::new(Identities::default()));
    let mut feed = ours.subscribe().await.unwrap();

    let bob = theirs.register(Uuid::new_v4(), "bob@example.com", "bob").await.unwrap();
    ours.apply_change_event(common::next_event(&mut feed).await);
    assert_eq!(ours.items(), vec![bob]);
}
