pub mod channel;
pub mod coordinator;
pub mod emitter;
pub mod registry;

pub use self::channel::{DeliveryReport, ListenerId, Transport, UpdateChannel};
pub use self::coordinator::{AutoRefresh, RefreshError, RefreshPolicy, RefreshStats, ReloadFn};
pub use self::emitter::UpdateEmitter;
pub use self::registry::{Subscription, UpdateRegistry};

use std::sync::Arc;

/// The process-wide update bus: one channel plus the emitter and registry
/// built on it. Construct once at start-up and hand clones to every
/// producer and consumer.
#[derive(Clone, Debug)]
pub struct UpdateHub {
    pub channel: Arc<UpdateChannel>,
    pub emitter: UpdateEmitter,
    pub registry: Arc<UpdateRegistry>,
}

impl UpdateHub {
    pub fn new() -> Self {
        let channel = Arc::new(UpdateChannel::new());
        Self {
            emitter: UpdateEmitter::new(channel.clone()),
            registry: Arc::new(UpdateRegistry::new(channel.clone())),
            channel,
        }
    }

    /// New coordinator bound to this hub's registry.
    pub fn auto_refresh(&self, name: impl Into<String>, policy: RefreshPolicy) -> AutoRefresh {
        AutoRefresh::new(name, self.registry.clone(), policy)
    }
}

impl Default for UpdateHub {
    fn default() -> Self {
        Self::new()
    }
}
