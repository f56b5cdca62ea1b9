//! WebSocket gateway: connection manager, frame router, handlers, and the
//! worker ingress for assistant streaming.
//!
//! One WebSocket per device. Each connection runs a read task and a write
//! task; the write side drains a bounded per-session queue, which is what
//! gives FIFO delivery per session and backpressure (overflow closes the
//! session with a recoverable code). Fan-out is selective: stream chunks go
//! only to devices viewing the chat, terminators go to every device.

pub mod broadcast;
pub mod handlers;
pub mod ingress;
pub mod rate_limit;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

pub use {
    ingress::WorkerIngress,
    server::{build_app, serve},
    state::{ConnectionManager, CoreServices, GatewayState, Session},
};
