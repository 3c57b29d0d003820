//! Auto-refresh coordinator.
//!
//! Turns a stream of [`UpdateEvent`]s into debounced, mutually exclusive,
//! time-bounded executions of a caller-supplied reload:
//!
//! ```text
//! Idle --event--> Scheduled --debounce--> Running --settle/timeout--> Idle
//!                   |  ^                     |
//!                   +--+ event: re-arm       + event: dropped
//! ```
//!
//! - At most one reload runs at a time per coordinator.
//! - Events while `Scheduled` restart the debounce window (one reload per burst).
//! - Events while `Running` are dropped, not queued. The next event after the
//!   reload settles schedules a fresh one.
//! - A reload that errors or exceeds the timeout is logged and never retried.
//!   A timed-out reload is not cancelled: it keeps running on its own task
//!   and whatever it does when it finishes still happens, but the
//!   coordinator stops waiting and returns to `Idle`.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::realtime::registry::{Subscription, UpdateRegistry};
use crate::types::server_config::RefreshConfig;
use crate::types::update::UpdateEvent;

pub type ReloadFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

// ---------------------------------------------------------------------------
// Policy / errors / stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Quiet period after the latest event before the reload runs.
    pub debounce: Duration,
    /// Ceiling for one reload; exceeding it releases the coordinator.
    pub timeout: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            timeout: Duration::from_secs(10),
        }
    }
}

impl From<&RefreshConfig> for RefreshPolicy {
    fn from(cfg: &RefreshConfig) -> Self {
        Self {
            debounce: cfg.debounce(),
            timeout: cfg.timeout(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("coordinator '{0}' is already started")]
    AlreadyStarted(String),

    #[error("coordinator '{0}' must be started inside a tokio runtime")]
    NoRuntime(String),
}

/// Counters since construction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshStats {
    /// Reload timers armed.
    pub scheduled: u64,
    /// Timers replaced by a later event inside the debounce window.
    pub coalesced: u64,
    /// Events discarded because a reload was running.
    pub dropped: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
}

#[derive(Debug, Default)]
struct Counters {
    scheduled: AtomicU64,
    coalesced: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RefreshStats {
        RefreshStats {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle state
// ---------------------------------------------------------------------------

struct PendingReload {
    ticket: u64,
    handle: JoinHandle<()>,
}

/// Everything the event handler and the timer task race on. Guarded by one
/// mutex so "check refreshing, then (re)arm" and "claim ticket, then mark
/// refreshing" are each atomic.
#[derive(Default)]
struct Cycle {
    active: bool,
    refreshing: bool,
    pending: Option<PendingReload>,
    next_ticket: u64,
}

struct Shared {
    name: String,
    policy: RefreshPolicy,
    cycle: Mutex<Cycle>,
    counters: Counters,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Cycle> {
        self.cycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears `refreshing` however the reload task ends (settled, timed out,
/// aborted or panicked).
struct RefreshingGuard(Arc<Shared>);

impl Drop for RefreshingGuard {
    fn drop(&mut self) {
        self.0.lock().refreshing = false;
    }
}

// ---------------------------------------------------------------------------
// AutoRefresh
// ---------------------------------------------------------------------------

/// One coordinator per consuming view. Dropping it is equivalent to
/// [`stop`](AutoRefresh::stop).
pub struct AutoRefresh {
    shared: Arc<Shared>,
    registry: Arc<UpdateRegistry>,
    subscription: Mutex<Option<Subscription>>,
}

impl fmt::Debug for AutoRefresh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoRefresh")
            .field("name", &self.shared.name)
            .field("policy", &self.shared.policy)
            .field("active", &self.is_active())
            .field("refreshing", &self.is_refreshing())
            .field("scheduled", &self.is_scheduled())
            .finish()
    }
}

impl AutoRefresh {
    pub fn new(name: impl Into<String>, registry: Arc<UpdateRegistry>, policy: RefreshPolicy) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                policy,
                cycle: Mutex::new(Cycle::default()),
                counters: Counters::default(),
            }),
            registry,
            subscription: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.shared.policy
    }

    /// Subscribe and run `reload` in response to updates until
    /// [`stop`](Self::stop). Must be called from within a tokio runtime.
    pub fn start<F, Fut>(&self, reload: F) -> Result<(), RefreshError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let reload: ReloadFn = Arc::new(move || reload().boxed());
        self.start_with(reload)
    }

    pub fn start_with(&self, reload: ReloadFn) -> Result<(), RefreshError> {
        let runtime =
            Handle::try_current().map_err(|_| RefreshError::NoRuntime(self.shared.name.clone()))?;

        let mut slot = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(RefreshError::AlreadyStarted(self.shared.name.clone()));
        }

        self.shared.lock().active = true;

        let shared = self.shared.clone();
        let subscription = self.registry.subscribe_to_updates(move |event| {
            on_event(&shared, &runtime, &reload, event);
            Ok(())
        });
        *slot = Some(subscription);

        info!(
            "[{}] auto-refresh started (debounce {:?}, timeout {:?})",
            self.shared.name, self.shared.policy.debounce, self.shared.policy.timeout
        );
        Ok(())
    }

    /// Cancel the pending timer, then unsubscribe. A reload already running
    /// is left to finish; it cannot be followed by another one.
    pub fn stop(&self) {
        let mut slot = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(subscription) = slot.take() else {
            return;
        };

        {
            let mut cycle = self.shared.lock();
            cycle.active = false;
            if let Some(pending) = cycle.pending.take() {
                pending.handle.abort();
                debug!("[{}] cancelled pending reload", self.shared.name);
            }
        }

        subscription.unsubscribe();
        info!("[{}] auto-refresh stopped", self.shared.name);
    }

    /// Re-subscribe against a new reload, e.g. after the view's query changed.
    pub fn restart<F, Fut>(&self, reload: F) -> Result<(), RefreshError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.stop();
        self.start(reload)
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().active
    }

    pub fn is_refreshing(&self) -> bool {
        self.shared.lock().refreshing
    }

    pub fn is_scheduled(&self) -> bool {
        self.shared.lock().pending.is_some()
    }

    pub fn stats(&self) -> RefreshStats {
        self.shared.counters.snapshot()
    }
}

impl Drop for AutoRefresh {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Event handling
// ---------------------------------------------------------------------------

/// Runs synchronously inside `publish`: only takes the cycle lock and arms a
/// timer task.
fn on_event(shared: &Arc<Shared>, runtime: &Handle, reload: &ReloadFn, event: &UpdateEvent) {
    let mut cycle = shared.lock();
    if !cycle.active {
        return;
    }

    if cycle.refreshing {
        Counters::bump(&shared.counters.dropped);
        debug!(
            "[{}] reload in flight, dropping {} {} event {}",
            shared.name, event.kind, event.action, event.id
        );
        return;
    }

    if let Some(previous) = cycle.pending.take() {
        previous.handle.abort();
        Counters::bump(&shared.counters.coalesced);
    }

    cycle.next_ticket += 1;
    let ticket = cycle.next_ticket;
    let handle = runtime.spawn(run_cycle(shared.clone(), ticket, reload.clone()));
    cycle.pending = Some(PendingReload { ticket, handle });
    Counters::bump(&shared.counters.scheduled);

    debug!(
        "[{}] {} {} event {} scheduled reload #{}",
        shared.name, event.kind, event.action, event.id, ticket
    );
}

async fn run_cycle(shared: Arc<Shared>, ticket: u64, reload: ReloadFn) {
    tokio::time::sleep(shared.policy.debounce).await;

    {
        let mut cycle = shared.lock();
        let is_current = cycle.pending.as_ref().map(|p| p.ticket) == Some(ticket);
        if !is_current || !cycle.active {
            return;
        }
        // Dropping our own JoinHandle detaches; it does not abort.
        cycle.pending = None;
        cycle.refreshing = true;
    }
    let _guard = RefreshingGuard(shared.clone());

    let started = Instant::now();
    let running = tokio::spawn(reload());
    match tokio::time::timeout(shared.policy.timeout, running).await {
        Ok(Ok(Ok(()))) => {
            Counters::bump(&shared.counters.completed);
            debug!(
                "[{}] reload #{} finished in {:?}",
                shared.name,
                ticket,
                started.elapsed()
            );
        }
        Ok(Ok(Err(e))) => {
            Counters::bump(&shared.counters.failed);
            warn!("[{}] reload #{} failed: {:#}", shared.name, ticket, e);
        }
        Ok(Err(join)) => {
            Counters::bump(&shared.counters.failed);
            warn!("[{}] reload #{} panicked: {}", shared.name, ticket, join);
        }
        // Dropping the JoinHandle detaches the reload; it runs to completion.
        Err(_) => {
            Counters::bump(&shared.counters.timed_out);
            warn!(
                "[{}] reload #{} timed out after {:?}; no longer awaited",
                shared.name, ticket, shared.policy.timeout
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::channel::UpdateChannel;
    use crate::types::update::{EntityKind, UPDATE_EVENT, UpdateAction};
    use std::sync::atomic::AtomicUsize;

    const DEBOUNCE: Duration = Duration::from_millis(300);
    const TIMEOUT: Duration = Duration::from_secs(5);

    fn setup() -> (Arc<UpdateChannel>, Arc<UpdateRegistry>) {
        let channel = Arc::new(UpdateChannel::new());
        let registry = Arc::new(UpdateRegistry::new(channel.clone()));
        (channel, registry)
    }

    fn publish(channel: &UpdateChannel) {
        channel.publish(
            UPDATE_EVENT,
            &UpdateEvent::new(EntityKind::Match, UpdateAction::Update, serde_json::json!({})),
        );
    }

    fn policy() -> RefreshPolicy {
        RefreshPolicy {
            debounce: DEBOUNCE,
            timeout: TIMEOUT,
        }
    }

    fn counting_reload(hits: &Arc<AtomicUsize>) -> impl Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static {
        let hits = hits.clone();
        move || {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        }
    }

    #[test]
    fn start_outside_runtime_fails() {
        let (_channel, registry) = setup();
        let refresh = AutoRefresh::new("no-rt", registry, policy());
        let err = refresh.start(|| async { Ok(()) }).unwrap_err();
        assert_eq!(err, RefreshError::NoRuntime("no-rt".into()));
        assert!(!refresh.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected() {
        let (_channel, registry) = setup();
        let refresh = AutoRefresh::new("twice", registry.clone(), policy());
        refresh.start(|| async { Ok(()) }).unwrap();
        assert!(matches!(
            refresh.start(|| async { Ok(()) }),
            Err(RefreshError::AlreadyStarted(_))
        ));
        assert_eq!(registry.subscriber_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn event_arms_timer_then_runs_once() {
        let (channel, registry) = setup();
        let hits = Arc::new(AtomicUsize::new(0));
        let refresh = AutoRefresh::new("single", registry, policy());
        refresh.start(counting_reload(&hits)).unwrap();

        publish(&channel);
        assert!(refresh.is_scheduled());

        tokio::time::sleep(DEBOUNCE / 2).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        tokio::time::sleep(DEBOUNCE).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!refresh.is_scheduled());
        assert!(!refresh.is_refreshing());
        assert_eq!(refresh.stats().completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn event_while_running_is_dropped() {
        let (channel, registry) = setup();
        let hits = Arc::new(AtomicUsize::new(0));
        let refresh = AutoRefresh::new("busy", registry, policy());
        let h = hits.clone();
        refresh
            .start(move || {
                let h = h.clone();
                async move {
                    h.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(())
                }
            })
            .unwrap();

        publish(&channel);
        tokio::time::sleep(DEBOUNCE + Duration::from_millis(10)).await;
        assert!(refresh.is_refreshing());

        publish(&channel);
        assert!(!refresh.is_scheduled());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(refresh.stats().dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reload_is_not_retried() {
        let (channel, registry) = setup();
        let hits = Arc::new(AtomicUsize::new(0));
        let refresh = AutoRefresh::new("failing", registry, policy());
        let h = hits.clone();
        refresh
            .start(move || {
                let h = h.clone();
                async move {
                    h.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(anyhow::anyhow!("network unreachable"))
                }
            })
            .unwrap();

        publish(&channel);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(refresh.stats().failed, 1);
        assert!(!refresh.is_refreshing());

        // The next real event tries again from Idle.
        publish(&channel);
        tokio::time::sleep(DEBOUNCE * 2).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_reload_still_runs_to_completion() {
        let (channel, registry) = setup();
        let finished = Arc::new(AtomicUsize::new(0));
        let refresh = AutoRefresh::new("slow", registry, policy());
        let f = finished.clone();
        refresh
            .start(move || {
                let f = f.clone();
                async move {
                    tokio::time::sleep(TIMEOUT * 2).await;
                    f.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        publish(&channel);
        tokio::time::sleep(DEBOUNCE + TIMEOUT + Duration::from_millis(10)).await;
        assert!(!refresh.is_refreshing());
        assert_eq!(refresh.stats().timed_out, 1);
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        tokio::time::sleep(TIMEOUT).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(refresh.stats().completed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_reload_counts_as_failed() {
        let (channel, registry) = setup();
        let refresh = AutoRefresh::new("panicky", registry, policy());
        refresh
            .start(|| async {
                if true {
                    panic!("reload exploded");
                }
                Ok(())
            })
            .unwrap();

        publish(&channel);
        tokio::time::sleep(DEBOUNCE * 2).await;
        assert_eq!(refresh.stats().failed, 1);
        assert!(!refresh.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_uses_new_reload() {
        let (channel, registry) = setup();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let refresh = AutoRefresh::new("restart", registry.clone(), policy());

        refresh.start(counting_reload(&first)).unwrap();
        publish(&channel);
        tokio::time::sleep(DEBOUNCE * 2).await;

        refresh.restart(counting_reload(&second)).unwrap();
        assert_eq!(registry.subscriber_count(), 1);
        publish(&channel);
        tokio::time::sleep(DEBOUNCE * 2).await;

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_unsubscribes_and_cancels() {
        let (channel, registry) = setup();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let refresh = AutoRefresh::new("dropped", registry.clone(), policy());
            refresh.start(counting_reload(&hits)).unwrap();
            publish(&channel);
        }
        assert_eq!(registry.subscriber_count(), 0);
        tokio::time::sleep(DEBOUNCE * 3).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let (_channel, registry) = setup();
        let refresh = AutoRefresh::new("idem", registry, policy());
        refresh.stop();
        refresh.start(|| async { Ok(()) }).unwrap();
        refresh.stop();
        refresh.stop();
        assert!(!refresh.is_active());
    }
}
