mod sse;

pub use sse::{
    KEEPALIVE_FRAME, SseStreamBuilder, SseTransport, UpdateFanout, handle_sse_subscribe,
    update_stream,
};
