/// Behavioural tests for the update channel, registry and coordinator,
/// driven only through the public API the server and client use.
///
/// Timer-driven cases run on a paused tokio clock, so debounce and timeout
/// windows elapse instantly and deterministically.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shared::realtime::{RefreshPolicy, UpdateHub};
use shared::types::{EntityKind, UPDATE_EVENT, UpdateAction, UpdateEvent};

const DEBOUNCE: Duration = Duration::from_millis(300);
const TIMEOUT: Duration = Duration::from_secs(5);

fn policy() -> RefreshPolicy {
    RefreshPolicy {
        debounce: DEBOUNCE,
        timeout: TIMEOUT,
    }
}

fn highlight_created(n: i64) -> UpdateEvent {
    UpdateEvent::new(
        EntityKind::Highlight,
        UpdateAction::Create,
        serde_json::json!({ "id": n, "title": format!("clip {}", n) }),
    )
}

// ---------------------------------------------------------------------------
// Channel / registry
// ---------------------------------------------------------------------------

#[test]
fn fan_out_reaches_every_subscriber_with_equal_payload() {
    let hub = UpdateHub::new();
    let received: Arc<Mutex<Vec<UpdateEvent>>> = Arc::new(Mutex::new(Vec::new()));

    let subs: Vec<_> = (0..8)
        .map(|_| {
            let received = received.clone();
            hub.registry.subscribe_to_updates(move |ev| {
                received.lock().unwrap().push(ev.clone());
                Ok(())
            })
        })
        .collect();

    let event = highlight_created(1);
    hub.emitter.trigger_update(event.clone());

    let received = received.lock().unwrap();
    assert_eq!(received.len(), subs.len());
    assert!(received.iter().all(|ev| *ev == event));
}

#[test]
fn unsubscribed_callback_never_runs_again() {
    let hub = UpdateHub::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    let sub = hub.registry.subscribe_to_updates(move |_| {
        h.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    sub.unsubscribe();
    for n in 0..1000 {
        hub.emitter.trigger_update(highlight_created(n));
    }
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    sub.unsubscribe();
}

#[test]
fn throwing_subscriber_does_not_starve_later_ones() {
    let hub = UpdateHub::new();
    let later = Arc::new(AtomicUsize::new(0));

    let _bad = hub
        .registry
        .subscribe_to_updates(|_| panic!("subscriber blew up"));
    let _err = hub
        .registry
        .subscribe_to_updates(|_| anyhow::bail!("subscriber failed"));
    let l = later.clone();
    let _good = hub.registry.subscribe_to_updates(move |_| {
        l.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let report = hub.channel.publish(UPDATE_EVENT, &highlight_created(1));
    assert_eq!(later.load(Ordering::SeqCst), 1);
    assert_eq!(report.failed, 2);
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn burst_inside_debounce_window_reloads_once() {
    let hub = UpdateHub::new();
    let reloads = Arc::new(AtomicUsize::new(0));
    let refresh = hub.auto_refresh("highlights", policy());
    let r = reloads.clone();
    refresh
        .start(move || {
            let r = r.clone();
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap();

    for n in 0..5 {
        hub.emitter.trigger_update(highlight_created(n));
        tokio::time::sleep(DEBOUNCE / 10).await;
    }
    tokio::time::sleep(DEBOUNCE * 2).await;

    assert_eq!(reloads.load(Ordering::SeqCst), 1);
    let stats = refresh.stats();
    assert_eq!(stats.scheduled, 5);
    assert_eq!(stats.coalesced, 4);
    assert_eq!(stats.completed, 1);
}

#[tokio::test(start_paused = true)]
async fn reloads_never_overlap() {
    let hub = UpdateHub::new();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let entered = Arc::new(AtomicUsize::new(0));

    let refresh = hub.auto_refresh("matches", policy());
    {
        let (in_flight, overlaps, entered) = (in_flight.clone(), overlaps.clone(), entered.clone());
        refresh
            .start(move || {
                let (in_flight, overlaps, entered) =
                    (in_flight.clone(), overlaps.clone(), entered.clone());
                async move {
                    entered.fetch_add(1, Ordering::SeqCst);
                    if in_flight.fetch_add(1, Ordering::SeqCst) != 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();
    }

    // +0ms and +100ms: both inside the debounce window.
    hub.emitter.trigger_update(highlight_created(1));
    tokio::time::sleep(Duration::from_millis(100)).await;
    hub.emitter.trigger_update(highlight_created(2));

    // Let the reload start, then keep poking it while it runs.
    tokio::time::sleep(DEBOUNCE + Duration::from_millis(50)).await;
    assert!(refresh.is_refreshing());
    for n in 3..10 {
        hub.emitter.trigger_update(highlight_created(n));
        tokio::time::sleep(Duration::from_millis(40)).await;
    }

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(entered.load(Ordering::SeqCst), 1);
    assert_eq!(refresh.stats().dropped, 7);
}

#[tokio::test(start_paused = true)]
async fn hung_reload_is_released_after_timeout() {
    let hub = UpdateHub::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let refresh = hub.auto_refresh("featured", policy());
    let a = attempts.clone();
    refresh
        .start(move || {
            let a = a.clone();
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                futures_util::future::pending::<()>().await;
                Ok(())
            }
        })
        .unwrap();

    hub.emitter.trigger_update(highlight_created(1));
    tokio::time::sleep(DEBOUNCE + Duration::from_millis(10)).await;
    assert!(refresh.is_refreshing());

    tokio::time::sleep(TIMEOUT).await;
    assert!(!refresh.is_refreshing());
    assert_eq!(refresh.stats().timed_out, 1);

    hub.emitter.trigger_update(highlight_created(2));
    tokio::time::sleep(DEBOUNCE + Duration::from_millis(10)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn unmount_before_debounce_prevents_reload() {
    let hub = UpdateHub::new();
    let reloads = Arc::new(AtomicUsize::new(0));
    let refresh = hub.auto_refresh("videos", policy());
    let r = reloads.clone();
    refresh
        .start(move || {
            let r = r.clone();
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap();

    hub.emitter.trigger_update(highlight_created(1));
    assert!(refresh.is_scheduled());
    tokio::time::sleep(DEBOUNCE / 3).await;

    refresh.stop();
    assert!(!refresh.is_scheduled());
    assert_eq!(hub.registry.subscriber_count(), 0);

    tokio::time::sleep(DEBOUNCE * 4).await;
    assert_eq!(reloads.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn coordinators_refresh_independently() {
    let hub = UpdateHub::new();
    let a_hits = Arc::new(AtomicUsize::new(0));
    let b_hits = Arc::new(AtomicUsize::new(0));

    let a = hub.auto_refresh("a", policy());
    let b = hub.auto_refresh(
        "b",
        RefreshPolicy {
            debounce: DEBOUNCE * 3,
            timeout: TIMEOUT,
        },
    );
    for (refresh, hits) in [(&a, &a_hits), (&b, &b_hits)] {
        let hits = hits.clone();
        refresh
            .start(move || {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();
    }

    hub.emitter.trigger_update(highlight_created(1));
    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(a_hits.load(Ordering::SeqCst), 1);
    assert_eq!(b_hits.load(Ordering::SeqCst), 0);

    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(b_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn last_update_follows_emitted_events() {
    let hub = UpdateHub::new();
    let mut rx = hub.registry.last_update();

    let event = highlight_created(5);
    let ts = event.timestamp;
    hub.emitter.trigger_update(event);

    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow(), Some(ts));
}
