use std::sync::Arc;

use tokio::sync::RwLock;

use crate::state::{AppState, Channel};

pub fn normalize_channel_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > 64 {
        return None;
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return None;
    }
    Some(trimmed.to_string())
}

pub async fn get_or_create_channel(state: &AppState, name: &str) -> Arc<RwLock<Channel>> {
    {
        let channels = state.channels.read().await;
        if let Some(channel) = channels.get(name) {
            return channel.clone();
        }
    }
    let mut channels = state.channels.write().await;
    channels
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(RwLock::new(Channel::default())))
        .clone()
}

/// Drops the channel once its last peer has disconnected. Compares by
/// pointer so a racing recreation under the same name survives.
pub async fn drop_if_empty(state: &AppState, name: &str, channel: &Arc<RwLock<Channel>>) {
    let empty = channel.read().await.peers.is_empty();
    if !empty {
        return;
    }
    let mut channels = state.channels.write().await;
    if let Some(current) = channels.get(name) {
        if Arc::ptr_eq(current, channel) && current.read().await.peers.is_empty() {
            channels.remove(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_are_validated() {
        assert_eq!(
            normalize_channel_name(" session-K3XQ2P "),
            Some("session-K3XQ2P".to_string())
        );
        assert!(normalize_channel_name("").is_none());
        assert!(normalize_channel_name("has spaces").is_none());
        assert!(normalize_channel_name(&"x".repeat(65)).is_none());
    }

    #[tokio::test]
    async fn empty_channels_are_dropped() {
        let state = AppState::default();
        let channel = get_or_create_channel(&state, "session-AAAAAA").await;
        assert_eq!(state.channels.read().await.len(), 1);

        drop_if_empty(&state, "session-AAAAAA", &channel).await;
        assert!(state.channels.read().await.is_empty());
    }
}
