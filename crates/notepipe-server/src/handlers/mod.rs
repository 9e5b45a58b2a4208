//! HTTP/WebSocket request handlers.

mod api;
mod status_ws;

pub use api::{health, metrics_snapshot};
pub use status_ws::status_stream;
