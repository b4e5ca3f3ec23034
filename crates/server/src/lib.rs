//! HTTP/WebSocket server for the StreamVault download orchestrator.

pub mod api;
pub mod metrics;
pub mod state;
