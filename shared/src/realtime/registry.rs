use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::watch;
use tracing::debug;

use crate::realtime::channel::{ListenerId, UpdateChannel};
use crate::types::update::{UPDATE_EVENT, UpdateEvent};

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A live registration on the update topic. Unregisters on
/// [`unsubscribe`](Subscription::unsubscribe) or when dropped, whichever
/// comes first; further calls are no-ops.
pub struct Subscription {
    channel: Weak<UpdateChannel>,
    id: ListenerId,
    active: AtomicBool,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(channel) = self.channel.upgrade() {
            channel.unregister(UPDATE_EVENT, self.id);
        }
        debug!("Subscription {} closed", self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// ---------------------------------------------------------------------------
// UpdateRegistry
// ---------------------------------------------------------------------------

/// Per-consumer surface over the channel: subscribe to content updates and
/// observe when the last one arrived.
pub struct UpdateRegistry {
    channel: Arc<UpdateChannel>,
    last_update: Arc<watch::Sender<Option<i64>>>,
    _tracker: Subscription,
}

impl fmt::Debug for UpdateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateRegistry")
            .field("subscribers", &self.subscriber_count())
            .field("last_update", &self.last_update_at())
            .finish()
    }
}

impl UpdateRegistry {
    pub fn new(channel: Arc<UpdateChannel>) -> Self {
        let (tx, _) = watch::channel(None);
        let last_update = Arc::new(tx);

        let tracker = {
            let last_update = last_update.clone();
            subscribe(&channel, move |event| {
                last_update.send_replace(Some(event.timestamp));
                Ok(())
            })
        };

        Self {
            channel,
            last_update,
            _tracker: tracker,
        }
    }

    pub fn channel(&self) -> &Arc<UpdateChannel> {
        &self.channel
    }

    pub fn subscribe_to_updates<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&UpdateEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        subscribe(&self.channel, callback)
    }

    /// Timestamp of the most recent event, for views that only need to know
    /// "something changed".
    pub fn last_update(&self) -> watch::Receiver<Option<i64>> {
        self.last_update.subscribe()
    }

    pub fn last_update_at(&self) -> Option<i64> {
        *self.last_update.borrow()
    }

    /// Active subscriptions, excluding the registry's own tracker.
    pub fn subscriber_count(&self) -> usize {
        self.channel.listener_count(UPDATE_EVENT).saturating_sub(1)
    }
}

fn subscribe<F>(channel: &Arc<UpdateChannel>, callback: F) -> Subscription
where
    F: Fn(&UpdateEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    let id = channel.register(UPDATE_EVENT, callback);
    Subscription {
        channel: Arc::downgrade(channel),
        id,
        active: AtomicBool::new(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::update::{EntityKind, UpdateAction};
    use std::sync::atomic::AtomicUsize;

    fn event() -> UpdateEvent {
        UpdateEvent::new(EntityKind::Video, UpdateAction::Create, serde_json::json!({}))
    }

    #[test]
    fn unsubscribe_twice_is_noop() {
        let channel = Arc::new(UpdateChannel::new());
        let registry = UpdateRegistry::new(channel.clone());
        let sub = registry.subscribe_to_updates(|_| Ok(()));
        assert_eq!(registry.subscriber_count(), 1);
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let channel = Arc::new(UpdateChannel::new());
        let registry = UpdateRegistry::new(channel.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let h = hits.clone();
            let _sub = registry.subscribe_to_updates(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            channel.publish(UPDATE_EVENT, &event());
        }
        channel.publish(UPDATE_EVENT, &event());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn last_update_tracks_latest_timestamp() {
        let channel = Arc::new(UpdateChannel::new());
        let registry = UpdateRegistry::new(channel.clone());
        let rx = registry.last_update();
        assert_eq!(*rx.borrow(), None);

        let mut ev = event();
        ev.timestamp = 42;
        channel.publish(UPDATE_EVENT, &ev);
        assert_eq!(registry.last_update_at(), Some(42));
        assert_eq!(*rx.borrow(), Some(42));
    }

    #[test]
    fn subscription_outliving_channel_is_harmless() {
        let channel = Arc::new(UpdateChannel::new());
        let sub = {
            let registry = UpdateRegistry::new(channel.clone());
            registry.subscribe_to_updates(|_| Ok(()))
        };
        drop(channel);
        sub.unsubscribe();
    }
}
