//! Local mirrors of remote chat collections kept in sync with a live change
//! stream.
//!
//! Each entity type gets a [`ReconcilingCollection`] that loads a snapshot,
//! applies its own writes, and merges [`ChangeEvent`]s from a [`LiveFeed`].
//! The merge rules make every event idempotent, so the echo of a local write
//! and the write's own result may arrive in either order.

pub mod channels;
pub mod collection;
pub mod credentials;
pub mod entity;
pub mod error;
pub mod messages;
pub mod normalize;
pub mod subscription;
pub mod users;

pub use channels::Channels;
pub use collection::{CollectionView, ReconcilingCollection};
pub use entity::Entity;
pub use error::SyncError;
pub use messages::Messages;
pub use normalize::{Change, ChangeEvent, Normalizer};
pub use subscription::{LiveFeed, StopHandle, SubscriptionManager};
pub use users::{IdentityAdmin, Users};
