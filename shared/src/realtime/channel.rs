use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, error, info, warn};

use crate::types::update::{UpdateEvent, UpdateId};

/// Callback signature for channel listeners. Returning `Err` is logged and
/// counted; it never stops delivery to the remaining listeners.
pub type ListenerFn = dyn Fn(&UpdateEvent) -> anyhow::Result<()> + Send + Sync;

/// How many recently delivered event ids are remembered for de-duplication.
const SEEN_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Listener / transport types
// ---------------------------------------------------------------------------

/// Handle for one registration. Registering the same callback twice yields
/// two ids and two invocations per publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone)]
struct Listener {
    id: ListenerId,
    callback: Arc<ListenerFn>,
}

/// Bridge to an execution context the in-process listener lists do not
/// reach (another process, a push stream, ...).
///
/// Outbound: `forward` is called once per local publish, after local
/// delivery. Inbound: the transport hands received events to
/// [`UpdateChannel::deliver_inbound`].
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    fn forward(&self, event_name: &str, event: &UpdateEvent) -> anyhow::Result<()>;
}

/// Outcome of one delivery pass over the local listeners.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

impl DeliveryReport {
    pub fn invoked(&self) -> usize {
        self.delivered + self.failed
    }
}

// ---------------------------------------------------------------------------
// Seen-id window
// ---------------------------------------------------------------------------

/// Where an id first reached this channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Local,
    Inbound,
}

#[derive(Debug)]
struct SeenIds {
    order: VecDeque<UpdateId>,
    origins: HashMap<UpdateId, Origin>,
    capacity: usize,
}

impl SeenIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            origins: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `id` unless already present; returns the origin it was first
    /// seen with, if any.
    fn record(&mut self, id: UpdateId, origin: Origin) -> Option<Origin> {
        if let Some(first) = self.origins.get(&id) {
            return Some(*first);
        }
        self.origins.insert(id, origin);
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.origins.remove(&oldest);
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// UpdateChannel
// ---------------------------------------------------------------------------

/// Named publish/subscribe bus. Constructed once per process and shared as
/// `Arc<UpdateChannel>`.
pub struct UpdateChannel {
    /// event name → listeners in registration order
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
    transports: RwLock<Vec<Arc<dyn Transport>>>,
    seen: Mutex<SeenIds>,
    next_id: AtomicU64,
}

impl fmt::Debug for UpdateChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<&str, usize> = listeners
            .iter()
            .map(|(name, list)| (name.as_str(), list.len()))
            .collect();
        f.debug_struct("UpdateChannel")
            .field("listeners", &counts)
            .field("transports", &self.transport_names())
            .finish()
    }
}

impl Default for UpdateChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateChannel {
    pub fn new() -> Self {
        Self::with_seen_capacity(SEEN_CAPACITY)
    }

    pub fn with_seen_capacity(capacity: usize) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            transports: RwLock::new(Vec::new()),
            seen: Mutex::new(SeenIds::new(capacity.max(1))),
            next_id: AtomicU64::new(1),
        }
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Append `callback` to the listener list for `event_name`.
    pub fn register<F>(&self, event_name: &str, callback: F) -> ListenerId
    where
        F: Fn(&UpdateEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_arc(event_name, Arc::new(callback))
    }

    pub fn register_arc(&self, event_name: &str, callback: Arc<ListenerFn>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let list = listeners.entry(event_name.to_string()).or_default();
        list.push(Listener { id, callback });
        debug!(
            "Registered listener {} on '{}' ({} total)",
            id,
            event_name,
            list.len()
        );
        id
    }

    /// Remove one registration. Unknown ids are a no-op and return `false`.
    pub fn unregister(&self, event_name: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = listeners.get_mut(event_name) else {
            return false;
        };
        let Some(pos) = list.iter().position(|l| l.id == id) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            listeners.remove(event_name);
        }
        debug!("Unregistered listener {} from '{}'", id, event_name);
        true
    }

    pub fn listener_count(&self, event_name: &str) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_name)
            .map_or(0, Vec::len)
    }

    // ── Transports ────────────────────────────────────────────────────────────

    pub fn install_transport(&self, transport: Arc<dyn Transport>) {
        info!("Installing update transport '{}'", transport.name());
        self.transports
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(transport);
    }

    pub fn remove_transport(&self, name: &str) -> bool {
        let mut transports = self.transports.write().unwrap_or_else(PoisonError::into_inner);
        let before = transports.len();
        transports.retain(|t| t.name() != name);
        before != transports.len()
    }

    pub fn transport_names(&self) -> Vec<String> {
        self.transports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|t| t.name().to_string())
            .collect()
    }

    // ── Delivery ──────────────────────────────────────────────────────────────

    /// Deliver `event` to every listener registered for `event_name`, in
    /// registration order, then forward it through every transport.
    ///
    /// Publishing the same event again delivers it again. Only an id that
    /// first arrived through [`deliver_inbound`](Self::deliver_inbound) (an
    /// echo that beat the local publish) is skipped, with an empty report.
    pub fn publish(&self, event_name: &str, event: &UpdateEvent) -> DeliveryReport {
        if self.record_seen(event.id, Origin::Local) == Some(Origin::Inbound) {
            debug!(
                "Skipping {} {} event {}: already received inbound",
                event.kind, event.action, event.id
            );
            return DeliveryReport::default();
        }
        let report = self.deliver_local(event_name, event);
        self.forward(event_name, event);
        report
    }

    /// Entry point for transports. Returns `None` when this channel already
    /// saw an event with the same id, from either side. Inbound events are
    /// never forwarded again.
    pub fn deliver_inbound(&self, event_name: &str, event: &UpdateEvent) -> Option<DeliveryReport> {
        if self.record_seen(event.id, Origin::Inbound).is_some() {
            debug!(
                "Skipping inbound {} {} event {}: already delivered",
                event.kind, event.action, event.id
            );
            return None;
        }
        Some(self.deliver_local(event_name, event))
    }

    fn record_seen(&self, id: UpdateId, origin: Origin) -> Option<Origin> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(id, origin)
    }

    fn deliver_local(&self, event_name: &str, event: &UpdateEvent) -> DeliveryReport {
        // Snapshot so callbacks can (un)register without deadlocking.
        let snapshot: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_name)
            .cloned()
            .unwrap_or_default();

        let mut report = DeliveryReport::default();
        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| (listener.callback)(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(
                        "Listener {} on '{}' failed for event {}: {:#}",
                        listener.id, event_name, event.id, e
                    );
                }
                Err(panic) => {
                    report.failed += 1;
                    error!(
                        "Listener {} on '{}' panicked for event {}: {}",
                        listener.id,
                        event_name,
                        event.id,
                        panic_message(panic.as_ref())
                    );
                }
            }
        }
        report
    }

    fn forward(&self, event_name: &str, event: &UpdateEvent) {
        let transports: Vec<Arc<dyn Transport>> = self
            .transports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for transport in transports {
            if let Err(e) = transport.forward(event_name, event) {
                warn!(
                    "Transport '{}' failed to forward event {}: {:#}",
                    transport.name(),
                    event.id,
                    e
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::update::{EntityKind, UpdateAction};
    use std::sync::atomic::AtomicUsize;

    fn event() -> UpdateEvent {
        UpdateEvent::new(
            EntityKind::League,
            UpdateAction::Update,
            serde_json::json!({"id": 3}),
        )
    }

    #[derive(Default)]
    struct Recorder {
        forwarded: Mutex<Vec<UpdateId>>,
    }

    impl Transport for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn forward(&self, _event_name: &str, event: &UpdateEvent) -> anyhow::Result<()> {
            self.forwarded.lock().unwrap().push(event.id);
            Ok(())
        }
    }

    #[test]
    fn delivery_follows_registration_order() {
        let channel = UpdateChannel::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..4 {
            let order = order.clone();
            channel.register("topic", move |_| {
                order.lock().unwrap().push(n);
                Ok(())
            });
        }
        channel.publish("topic", &event());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn same_callback_registered_twice_runs_twice() {
        let channel = UpdateChannel::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let cb: Arc<ListenerFn> = {
            let hits = hits.clone();
            Arc::new(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        channel.register_arc("topic", cb.clone());
        channel.register_arc("topic", cb);
        let report = channel.publish("topic", &event());
        assert_eq!(report.delivered, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let channel = UpdateChannel::new();
        let id = channel.register("topic", |_| Ok(()));
        assert!(channel.unregister("topic", id));
        assert!(!channel.unregister("topic", id));
        assert!(!channel.unregister("other", id));
        assert_eq!(channel.listener_count("topic"), 0);
    }

    #[test]
    fn other_event_names_are_not_invoked() {
        let channel = UpdateChannel::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        channel.register("a", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let report = channel.publish("b", &event());
        assert_eq!(report.invoked(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_listener_is_counted_not_fatal() {
        let channel = UpdateChannel::new();
        channel.register("topic", |_| anyhow::bail!("boom"));
        channel.register("topic", |_| panic!("listener exploded"));
        channel.register("topic", |_| Ok(()));
        let report = channel.publish("topic", &event());
        assert_eq!(report, DeliveryReport { delivered: 1, failed: 2 });
    }

    #[test]
    fn listener_may_unregister_itself_during_publish() {
        let channel = Arc::new(UpdateChannel::new());
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let id = {
            let inner = channel.clone();
            let slot = slot.clone();
            channel.register("topic", move |_| {
                if let Some(id) = *slot.lock().unwrap() {
                    inner.unregister("topic", id);
                }
                Ok(())
            })
        };
        *slot.lock().unwrap() = Some(id);
        assert_eq!(channel.publish("topic", &event()).delivered, 1);
        assert_eq!(channel.publish("topic", &event()).invoked(), 0);
    }

    #[test]
    fn publish_forwards_but_inbound_does_not() {
        let channel = UpdateChannel::new();
        let recorder = Arc::new(Recorder::default());
        channel.install_transport(recorder.clone());

        let local = event();
        channel.publish("topic", &local);
        let remote = event();
        channel.deliver_inbound("topic", &remote);

        assert_eq!(*recorder.forwarded.lock().unwrap(), vec![local.id]);
        assert!(channel.remove_transport("recorder"));
        assert!(channel.transport_names().is_empty());
    }

    #[test]
    fn inbound_duplicate_of_local_publish_is_skipped() {
        let channel = UpdateChannel::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        channel.register("topic", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let ev = event();
        channel.publish("topic", &ev);
        assert!(channel.deliver_inbound("topic", &ev).is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let fresh = event();
        assert_eq!(channel.deliver_inbound("topic", &fresh).map(|r| r.delivered), Some(1));
        assert!(channel.deliver_inbound("topic", &fresh).is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn local_publish_after_inbound_echo_is_skipped() {
        let channel = UpdateChannel::new();
        let recorder = Arc::new(Recorder::default());
        channel.install_transport(recorder.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        channel.register("topic", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let ev = event();
        assert!(channel.deliver_inbound("topic", &ev).is_some());
        assert_eq!(channel.publish("topic", &ev), DeliveryReport::default());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(recorder.forwarded.lock().unwrap().is_empty());
    }

    #[test]
    fn republishing_same_event_delivers_twice() {
        let channel = UpdateChannel::new();
        let recorder = Arc::new(Recorder::default());
        channel.install_transport(recorder.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        channel.register("topic", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let ev = event();
        assert_eq!(channel.publish("topic", &ev).delivered, 1);
        assert_eq!(channel.publish("topic", &ev.clone()).delivered, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(*recorder.forwarded.lock().unwrap(), vec![ev.id, ev.id]);

        // The echo of either publish is still dropped.
        assert!(channel.deliver_inbound("topic", &ev).is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn seen_window_evicts_oldest() {
        let channel = UpdateChannel::with_seen_capacity(2);
        let first = event();
        channel.publish("topic", &first);
        channel.publish("topic", &event());
        channel.publish("topic", &event());
        // `first` fell out of the window, so it is delivered again.
        assert!(channel.deliver_inbound("topic", &first).is_some());
    }
}
