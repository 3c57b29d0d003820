pub mod config;

pub use self::config::{load_client_config, load_config};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::types::server_config::AppConfig;

/// Server config shared by both surfaces and swapped in place on SIGHUP.
///
/// Only settings read per request take effect on reload: the admin token
/// and the SSE keepalive. Ports, connection limits, the database URL and
/// the fan-out capacity are bound at start-up; [`reload`](Self::reload)
/// stores them but warns that they wait for a restart.
#[derive(Clone, Debug)]
pub struct LiveConfig(Arc<RwLock<AppConfig>>);

impl LiveConfig {
    pub fn new(config: AppConfig) -> Self {
        Self(Arc::new(RwLock::new(config)))
    }

    /// Read guard for multi-field reads. Keep it short-lived.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.0.read().await
    }

    /// Token admin requests must present; `ADMIN_TOKEN` wins over the file.
    pub async fn admin_token(&self) -> Option<String> {
        self.0.read().await.auth.resolved_admin_token()
    }

    pub async fn keepalive(&self) -> Duration {
        self.0.read().await.realtime.keepalive()
    }

    pub async fn reload(&self, new: AppConfig) {
        let mut current = self.0.write().await;

        if current.server != new.server {
            warn!("[server] changed on reload; listeners keep their start-up settings");
        }
        if current.database != new.database {
            warn!("[database] changed on reload; the open pool is kept until restart");
        }
        if current.realtime.channel_capacity != new.realtime.channel_capacity {
            warn!(
                "realtime.channel_capacity {} -> {} applies after restart",
                current.realtime.channel_capacity, new.realtime.channel_capacity
            );
        }
        if current.auth.admin_token != new.auth.admin_token {
            info!("Admin token rotated");
        }

        *current = new;
    }
}
