use tracing::info;

use ripple_sync::{Channels, SyncError};

/// Channels every installation is expected to have: name, description,
/// public.
pub const DEFAULT_CHANNELS: &[(&str, &str, bool)] = &[
    ("public", "Public channel", true),
    ("support", "Support channel", false),
];

/// Create whichever default channels are missing from the loaded
/// collection. Returns how many were created.
pub async fn ensure_default_channels(channels: &Channels) -> Result<usize, SyncError> {
    let mut created = 0;
    for &(name, description, is_public) in DEFAULT_CHANNELS {
        if channels.find_by_name(name).is_some() {
            continue;
        }
        channels.create(name, Some(description), is_public).await?;
        info!("Created default channel {}", name);
        created += 1;
    }
    Ok(created)
}
