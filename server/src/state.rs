use std::collections::HashMap;
use std::sync::Arc;

use slateboard_shared::messages::{PresenceMeta, ServerFrame};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct AppState {
    pub channels: Arc<RwLock<HashMap<String, Arc<RwLock<Channel>>>>>,
}

/// One named pub/sub channel: connected peers and their tracked presence
/// records. Nothing outlives the channel; when the last peer leaves the
/// channel is dropped.
#[derive(Default)]
pub struct Channel {
    pub peers: HashMap<Uuid, mpsc::UnboundedSender<ServerFrame>>,
    pub presence: HashMap<Uuid, PresenceMeta>,
}

impl Channel {
    pub fn roster(&self) -> Vec<PresenceMeta> {
        let mut roster = self.presence.values().cloned().collect::<Vec<_>>();
        roster.sort_by(|a, b| a.username.cmp(&b.username));
        roster
    }
}
