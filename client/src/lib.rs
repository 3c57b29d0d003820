//! Headless client for the sports content API: typed API calls, the SSE
//! bridge that feeds server updates into the local update channel, screen
//! view models that refresh themselves, and the admin write path.

pub mod admin;
pub mod api;
pub mod bridge;
pub mod screens;

pub use admin::AdminConsole;
pub use api::{ApiClient, ApiError, ApiResult};
pub use bridge::{SseBridge, SseDecoder, SseFrame};
pub use screens::{HomeFeed, LiveView};
