//! dbwatch agent: polls a database for connection and query statistics,
//! logs changes and pushes live status to SSE / WebSocket subscribers.

pub mod broadcast;
pub mod config;
pub mod detector;
pub mod guard;
pub mod http;
pub mod logsink;
pub mod monitor;
pub mod pg;
pub mod sampler;
pub mod scheduler;
pub mod source;
pub mod sse;
pub mod state;
pub mod types;
pub mod ws;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
