//! Screen view models. A screen is a data snapshot kept fresh by its own
//! auto-refresh coordinator; rendering is left to whoever watches it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use shared::realtime::{AutoRefresh, RefreshError, RefreshPolicy, RefreshStats, UpdateHub};
use shared::types::{FeaturedVideo, Highlight, League, Match, Video};

use crate::api::{ApiClient, ApiResult};

pub type Loader<T> = Arc<dyn Fn() -> BoxFuture<'static, ApiResult<T>> + Send + Sync>;

/// Data shown on the landing screen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HomeFeed {
    pub featured: Option<FeaturedVideo>,
    pub highlights: Vec<Highlight>,
    pub matches: Vec<Match>,
}

pub struct LiveView<T> {
    name: String,
    loader: Loader<T>,
    snapshot: Arc<watch::Sender<Option<T>>>,
    loads: Arc<AtomicU64>,
    refresh: AutoRefresh,
}

impl<T> fmt::Debug for LiveView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveView")
            .field("name", &self.name)
            .field("loads", &self.loads.load(Ordering::Relaxed))
            .field("refresh", &self.refresh)
            .finish()
    }
}

impl<T> LiveView<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(name: impl Into<String>, hub: &UpdateHub, policy: RefreshPolicy, loader: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApiResult<T>> + Send + 'static,
    {
        let name = name.into();
        let (snapshot, _) = watch::channel(None);
        Self {
            refresh: hub.auto_refresh(name.clone(), policy),
            name,
            loader: Arc::new(move || loader().boxed()),
            snapshot: Arc::new(snapshot),
            loads: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Initial load, then keep the snapshot fresh on every content update.
    /// A failed initial load leaves the view empty; the coordinator is
    /// started regardless so the next update fills it.
    pub async fn mount(&self) -> Result<(), RefreshError> {
        match (self.loader)().await {
            Ok(data) => {
                self.snapshot.send_replace(Some(data));
                self.loads.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!("[{}] initial load failed: {}", self.name, e),
        }

        let loader = self.loader.clone();
        let snapshot = self.snapshot.clone();
        let loads = self.loads.clone();
        self.refresh.start(move || {
            let loader = loader.clone();
            let snapshot = snapshot.clone();
            let loads = loads.clone();
            async move {
                let data = loader().await?;
                snapshot.send_replace(Some(data));
                loads.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        })?;
        info!("[{}] mounted", self.name);
        Ok(())
    }

    pub fn unmount(&self) {
        self.refresh.stop();
        info!("[{}] unmounted", self.name);
    }

    pub fn is_mounted(&self) -> bool {
        self.refresh.is_active()
    }

    /// Latest successfully loaded data; `None` before the first success.
    pub fn snapshot(&self) -> Option<T> {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<T>> {
        self.snapshot.subscribe()
    }

    /// Successful loads so far, the initial one included.
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> RefreshStats {
        self.refresh.stats()
    }
}

// ---------------------------------------------------------------------------
// Screens
// ---------------------------------------------------------------------------

pub fn matches(hub: &UpdateHub, api: &ApiClient, policy: RefreshPolicy) -> LiveView<Vec<Match>> {
    let api = api.clone();
    LiveView::new("matches", hub, policy, move || {
        let api = api.clone();
        async move { api.get_matches().await }
    })
}

pub fn leagues(hub: &UpdateHub, api: &ApiClient, policy: RefreshPolicy) -> LiveView<Vec<League>> {
    let api = api.clone();
    LiveView::new("leagues", hub, policy, move || {
        let api = api.clone();
        async move { api.get_leagues().await }
    })
}

pub fn videos(hub: &UpdateHub, api: &ApiClient, policy: RefreshPolicy) -> LiveView<Vec<Video>> {
    let api = api.clone();
    LiveView::new("videos", hub, policy, move || {
        let api = api.clone();
        async move { api.get_videos().await }
    })
}

pub fn highlights(
    hub: &UpdateHub,
    api: &ApiClient,
    policy: RefreshPolicy,
) -> LiveView<Vec<Highlight>> {
    let api = api.clone();
    LiveView::new("highlights", hub, policy, move || {
        let api = api.clone();
        async move { api.get_highlights().await }
    })
}

pub fn featured(
    hub: &UpdateHub,
    api: &ApiClient,
    policy: RefreshPolicy,
) -> LiveView<Option<FeaturedVideo>> {
    let api = api.clone();
    LiveView::new("featured", hub, policy, move || {
        let api = api.clone();
        async move { api.get_featured_video().await }
    })
}

/// Featured video, highlights and matches fetched concurrently; any failure
/// fails the whole load.
pub fn home(hub: &UpdateHub, api: &ApiClient, policy: RefreshPolicy) -> LiveView<HomeFeed> {
    let api = api.clone();
    LiveView::new("home", hub, policy, move || {
        let api = api.clone();
        async move {
            let (featured, highlights, matches) = tokio::try_join!(
                api.get_featured_video(),
                api.get_highlights(),
                api.get_matches()
            )?;
            Ok(HomeFeed {
                featured,
                highlights,
                matches,
            })
        }
    })
}
