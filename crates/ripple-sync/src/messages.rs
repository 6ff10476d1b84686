use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use ripple_types::api::{MessagePatch, NewEdit, NewMessage};
use ripple_types::events::Table;
use ripple_types::models::{EditHistoryEntry, Message, SenderProfile};
use ripple_types::remote::{Filter, Query, RemoteClient, Row};

use crate::collection::ReconcilingCollection;
use crate::entity::Entity;
use crate::error::{Result, SyncError};
use crate::normalize::Change;
use crate::subscription::LiveFeed;

/// Messages of one channel, with sender profile and edit history composed
/// onto each row.
pub struct Messages {
    collection: ReconcilingCollection<Message>,
}

impl Messages {
    pub fn new(remote: Arc<dyn RemoteClient>) -> Self {
        Self {
            collection: ReconcilingCollection::new(remote),
        }
    }

    /// Load the non-deleted messages of `channel_id`, oldest first.
    pub async fn load(&self, channel_id: Uuid) -> Result<usize> {
        let _guard = self.collection.begin();
        let rows = self
            .remote()
            .query(Table::Messages, &Message::snapshot_query(Some(channel_id)))
            .await
            .map_err(|e| self.collection.fail(SyncError::Fetch(e)))?;
        let messages = self.collection.decode_all(rows)?;
        let messages = self
            .compose_all(messages)
            .await
            .map_err(|e| self.collection.fail(e))?;
        Ok(self.collection.replace_all(messages))
    }

    pub async fn send_message(
        &self,
        channel_id: Uuid,
        content: &str,
        sender_id: Uuid,
    ) -> Result<Message> {
        let payload = NewMessage {
            channel_id,
            sender_id,
            content: content.to_string(),
        };
        let sent = self.collection.insert_remote(&payload).await?;
        Ok(self.refresh(sent).await)
    }

    /// Patch a message without archiving, then recompose it so the local
    /// copy keeps its sender and history.
    pub async fn update(&self, id: Uuid, patch: &MessagePatch) -> Result<Message> {
        let updated = self.collection.update_remote(id, patch).await?;
        Ok(self.refresh(updated).await)
    }

    /// Edit a message, archiving its current content first.
    ///
    /// History is best-effort: if archiving fails the edit still goes
    /// through. The returned row carries the full composed history.
    pub async fn edit_message(&self, id: Uuid, content: &str, editor: Uuid) -> Result<Message> {
        let _guard = self.collection.begin();
        let now = Utc::now();
        self.archive_current(id, editor, now).await;

        let patch = MessagePatch {
            content: Some(content.to_string()),
            updated_at: Some(now),
            ..Default::default()
        };
        let patch = serde_json::to_value(&patch).map_err(|e| self.collection.fail(e.into()))?;
        let row = self
            .remote()
            .update(Table::Messages, &id.to_string(), patch)
            .await
            .map_err(|e| self.collection.fail(SyncError::Write(e)))?;

        let message = match self.fetch_composed(id).await {
            Ok(Some(message)) => message,
            Ok(None) => self.collection.decode(row)?,
            Err(e) => {
                warn!("Edited message {} could not be recomposed: {}", id, e);
                self.collection.decode(row)?
            }
        };
        self.collection.replace_if_present(message.clone());
        Ok(message)
    }

    /// Soft delete: the row stays remotely with `deleted_at` set.
    pub async fn delete_message(&self, id: Uuid) -> Result<()> {
        self.collection.delete_remote(id).await
    }

    /// Re-fetch one message with its relations and replace it in place.
    pub async fn recompose(&self, id: Uuid) -> Result<Option<Message>> {
        let _guard = self.collection.begin();
        let composed = self
            .fetch_composed(id)
            .await
            .map_err(|e| self.collection.fail(e))?;
        if let Some(message) = &composed {
            self.collection.replace_if_present(message.clone());
        }
        Ok(composed)
    }

    pub async fn subscribe(&self, channel_id: Uuid) -> Result<LiveFeed<Message>> {
        self.collection.subscribe(Some(channel_id)).await
    }

    /// Drain `feed` into the collection. Stream rows carry no relations, so
    /// every inserted or updated message is recomposed after merging.
    pub async fn follow(&self, feed: &mut LiveFeed<Message>) {
        while let Some(event) = feed.next().await {
            let merged = match &event.change {
                Change::Inserted(m) | Change::Updated(m) => Some(m.clone()),
                Change::Removed(_) => None,
            };
            self.collection.apply_change_event(event);
            if let Some(message) = merged.filter(Message::is_visible) {
                self.refresh(message).await;
            }
        }
    }

    // -- Composition --

    async fn refresh(&self, message: Message) -> Message {
        match self.fetch_composed(message.id).await {
            Ok(Some(composed)) => {
                self.collection.replace_if_present(composed.clone());
                composed
            }
            Ok(None) => message,
            Err(e) => {
                warn!("Could not recompose message {}: {}", message.id, e);
                message
            }
        }
    }

    async fn archive_current(&self, id: Uuid, editor: Uuid, now: DateTime<Utc>) {
        let current = match self.remote().query(Table::Messages, &Query::by_id(id)).await {
            Ok(rows) => rows
                .into_iter()
                .next()
                .and_then(|row| row.get("content").and_then(Value::as_str).map(str::to_string)),
            Err(e) => {
                warn!("Could not read message {} before edit: {}", id, e);
                return;
            }
        };
        let Some(content) = current else {
            return;
        };

        let entry = NewEdit {
            message_id: id,
            content,
            edited_by: editor,
            edited_at: now,
        };
        let recorded = match serde_json::to_value(&entry) {
            Ok(row) => self.remote().insert(Table::MessageEdits, row).await.map(drop),
            Err(e) => {
                warn!("Could not encode edit history for {}: {}", id, e);
                return;
            }
        };
        match recorded {
            Ok(()) => debug!("Archived previous content of message {}", id),
            Err(e) => warn!("Edit history for message {} not recorded: {}", id, e),
        }
    }

    async fn fetch_composed(&self, id: Uuid) -> Result<Option<Message>> {
        let rows = self
            .remote()
            .query(Table::Messages, &Query::by_id(id))
            .await
            .map_err(SyncError::Fetch)?;
        let messages = decode_rows::<Message>(rows)?;
        Ok(self.compose_all(messages).await?.into_iter().next())
    }

    /// Fetch senders and edit histories for a batch of messages in two
    /// queries and compose them on.
    async fn compose_all(&self, messages: Vec<Message>) -> Result<Vec<Message>> {
        if messages.is_empty() {
            return Ok(messages);
        }

        let sender_ids: HashSet<String> = messages.iter().map(|m| m.sender_id.to_string()).collect();
        let senders = self
            .remote()
            .query(Table::Profiles, &Query::new().filter(Filter::is_in("id", sender_ids)))
            .await
            .map_err(SyncError::Fetch)?;

        let message_ids = messages.iter().map(|m| m.id.to_string());
        let edits = self
            .remote()
            .query(
                Table::MessageEdits,
                &Query::new()
                    .filter(Filter::is_in("message_id", message_ids))
                    .order_by("edited_at", true),
            )
            .await
            .map_err(SyncError::Fetch)?;

        Ok(compose(messages, decode_rows(senders)?, decode_rows(edits)?))
    }
}

impl Deref for Messages {
    type Target = ReconcilingCollection<Message>;

    fn deref(&self) -> &Self::Target {
        &self.collection
    }
}

fn decode_rows<T: serde::de::DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(SyncError::from))
        .collect()
}

/// Attach senders and histories. Both relations are always replaced
/// wholesale, never merged with what a message already carried.
fn compose(
    messages: Vec<Message>,
    senders: Vec<SenderProfile>,
    edits: Vec<EditHistoryEntry>,
) -> Vec<Message> {
    let senders: HashMap<Uuid, SenderProfile> = senders.into_iter().map(|s| (s.id, s)).collect();
    let mut history: HashMap<Uuid, Vec<EditHistoryEntry>> = HashMap::new();
    for entry in edits {
        history.entry(entry.message_id).or_default().push(entry);
    }

    messages
        .into_iter()
        .map(|mut message| {
            message.sender = senders.get(&message.sender_id).cloned();
            let mut entries = history.remove(&message.id).unwrap_or_default();
            entries.sort_by_key(|e| e.edited_at);
            message.edits = entries;
            message
        })
        .collect()
}
