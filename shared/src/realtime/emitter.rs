use std::sync::Arc;

use tracing::{info, warn};

use crate::realtime::channel::UpdateChannel;
use crate::types::update::{UPDATE_EVENT, UpdateEvent};

/// Write-path entry point: called once, right after a mutation is confirmed
/// by the store, with an event describing the primary entity that changed.
#[derive(Clone, Debug)]
pub struct UpdateEmitter {
    channel: Arc<UpdateChannel>,
}

impl UpdateEmitter {
    pub fn new(channel: Arc<UpdateChannel>) -> Self {
        Self { channel }
    }

    /// Publish synchronously on [`UPDATE_EVENT`]. Listener failures are
    /// isolated by the channel and only logged here.
    pub fn trigger_update(&self, event: UpdateEvent) {
        let report = self.channel.publish(UPDATE_EVENT, &event);
        info!(
            "Update {} {} ({}) delivered to {} listener(s)",
            event.kind,
            event.action,
            event.id,
            report.delivered
        );
        if report.failed > 0 {
            warn!(
                "Update {} had {} failing listener(s)",
                event.id, report.failed
            );
        }
    }
}
