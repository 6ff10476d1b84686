mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use ripple_sync::{Change, Channels, Messages, SyncError};
use ripple_types::events::{ChangeOperation, RawChange, Table};

use common::{Closing, Flaky, backend, next_event, seed_channel, seed_profile, shared};

#[tokio::test]
async fn local_insert_echo_leaves_one_element() {
    let remote = backend();
    let channels = Channels::new(shared(&remote));
    let mut feed = channels.subscribe().await.unwrap();

    let created = channels.create("general", None, true).await.unwrap();
    let echo = next_event(&mut feed).await;
    assert_eq!(echo.table, Table::Channels);
    assert_eq!(echo.change, Change::Inserted(created.clone()));

    channels.apply_change_event(echo.clone());
    channels.apply_change_event(echo);
    assert_eq!(channels.items(), vec![created]);
}

#[tokio::test]
async fn remote_writes_reach_a_following_collection() {
    let remote = backend();
    let ours = Channels::new(shared(&remote));
    let theirs = Channels::new(shared(&remote));
    let mut feed = ours.subscribe().await.unwrap();

    let created = theirs.create("support", None, false).await.unwrap();
    ours.apply_change_event(next_event(&mut feed).await);
    assert_eq!(ours.items().len(), 1);

    theirs.remove(created.id).await.unwrap();
    let removed = next_event(&mut feed).await;
    assert_eq!(removed.change, Change::Removed(created.id));
    ours.apply_change_event(removed);
    assert!(ours.items().is_empty());
}

#[tokio::test]
async fn follow_runs_until_stopped() {
    let remote = backend();
    let ours = Channels::new(shared(&remote));
    let theirs = Channels::new(shared(&remote));
    let mut feed = ours.subscribe().await.unwrap();
    let stop = feed.stop_handle();

    theirs.create("a", None, true).await.unwrap();
    theirs.create("b", None, true).await.unwrap();

    let follower = async {
        ours.follow(&mut feed).await;
    };
    let stopper = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.stop();
    };
    tokio::time::timeout(Duration::from_secs(2), async { tokio::join!(follower, stopper) })
        .await
        .unwrap();

    assert_eq!(ours.items().len(), 2);
}

#[tokio::test]
async fn stop_is_idempotent_and_unsubscribes() {
    let remote = backend();
    let channels = Channels::new(shared(&remote));
    let mut feed = channels.subscribe().await.unwrap();
    assert!(channels.is_subscribed());
    assert_eq!(remote.feed().subscriber_count().await, 1);

    let handle = feed.stop_handle();
    feed.stop();
    feed.stop();
    handle.stop();
    channels.unsubscribe();
    channels.unsubscribe();

    assert!(feed.next().await.is_none());
    assert!(!channels.is_subscribed());

    tokio::time::timeout(Duration::from_secs(2), async {
        while remote.feed().subscriber_count().await > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn stopping_without_a_subscription_is_a_noop() {
    let remote = backend();
    let channels = Channels::new(shared(&remote));
    channels.unsubscribe();
    assert!(!channels.is_subscribed());
}

#[tokio::test]
async fn second_start_requires_a_stop_first() {
    let remote = backend();
    let channels = Channels::new(shared(&remote));
    let first = channels.subscribe().await.unwrap();

    let err = channels.subscribe().await.unwrap_err();
    assert!(matches!(err, SyncError::AlreadySubscribed(Table::Channels)));

    first.stop();
    let second = channels.subscribe().await.unwrap();
    assert!(channels.is_subscribed());
    drop(second);
    assert!(!channels.is_subscribed());
}

#[tokio::test]
async fn failed_subscribe_can_be_retried() {
    let flaky = Flaky::new(backend());
    let channels = Channels::new(flaky.clone());

    flaky.set_fail_reads(true);
    assert!(matches!(
        channels.subscribe().await,
        Err(SyncError::Subscribe(_))
    ));
    assert!(!channels.is_subscribed());
    assert!(channels.error().is_some());

    flaky.set_fail_reads(false);
    assert!(channels.subscribe().await.is_ok());
}

#[tokio::test]
async fn message_feeds_are_scoped_to_their_channel() {
    let remote = backend();
    let user = seed_profile(&remote, "ann").await;
    let here = seed_channel(&remote, "here").await;
    let there = seed_channel(&remote, "there").await;

    let messages = Messages::new(shared(&remote));
    let mut feed = messages.subscribe(here).await.unwrap();
    assert_eq!(feed.scope(), Some(here));

    let writer = Messages::new(shared(&remote));
    writer.send_message(there, "elsewhere", user).await.unwrap();
    let sent = writer.send_message(here, "hello", user).await.unwrap();

    let event = next_event(&mut feed).await;
    assert_eq!(event.scope, Some(here));
    assert_eq!(event.change.id(), sent.id);
    assert!(feed.try_next().is_none());
}

#[tokio::test]
async fn switching_channels_needs_stop_then_start() {
    let remote = backend();
    let user = seed_profile(&remote, "ann").await;
    let first = seed_channel(&remote, "first").await;
    let second = seed_channel(&remote, "second").await;

    let messages = Messages::new(shared(&remote));
    let old = messages.subscribe(first).await.unwrap();
    assert!(messages.subscribe(second).await.is_err());

    old.stop();
    let mut feed = messages.subscribe(second).await.unwrap();
    let writer = Messages::new(shared(&remote));
    let sent = writer.send_message(second, "moved", user).await.unwrap();
    assert_eq!(next_event(&mut feed).await.change.id(), sent.id);
}

#[tokio::test]
async fn events_buffered_before_backend_close_are_delivered() {
    let id = Uuid::new_v4();
    let insert = RawChange {
        table: Table::Channels,
        operation: ChangeOperation::Insert,
        new_row: Some(json!({
            "id": id.to_string(),
            "name": "general",
            "is_public": true,
            "created_at": "2024-01-01T00:00:00Z",
        })),
        old_row: None,
    };
    let remote = Closing::new(backend(), vec![insert]);
    let channels = Channels::new(remote.clone());
    let mut feed = channels.subscribe().await.unwrap();

    // Let the forwarding task see the closed stream before draining.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!channels.is_subscribed());
    assert_eq!(remote.unsubscribed.load(Ordering::SeqCst), 1);

    let event = next_event(&mut feed).await;
    assert_eq!(event.change.id(), id);
    channels.apply_change_event(event);
    assert_eq!(channels.items().len(), 1);
    assert!(feed.next().await.is_none());

    // A closed stream frees the slot for a new subscription.
    assert!(channels.subscribe().await.is_ok());
}

#[tokio::test]
async fn live_feed_debug_shows_scope_and_state() {
    let remote = backend();
    let channel = seed_channel(&remote, "general").await;
    let messages = Messages::new(shared(&remote));
    let feed = messages.subscribe(channel).await.unwrap();

    let shown = format!("{:?}", feed);
    assert!(shown.contains(&channel.to_string()));
    assert!(shown.contains("stopped: false"));
}
