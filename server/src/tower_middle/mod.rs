/// Tower middleware layered over the router in `serve`.
///
/// CORS comes from `tower-http`; the request timeout is ours because it
/// answers with a 408 instead of surfacing an error to hyper.
pub mod tower_timeout_handler;

pub use tower_timeout_handler::{RequestTimeoutLayer, RequestTimeoutService};
