//! # culvert-server
//!
//! Axum HTTP + `WebSocket` server for the culvert control plane.
//!
//! - HTTP endpoints: health check
//! - `WebSocket` gateway at `/ws/{id}`: connection registry, liveness
//!   probes with idle timeout, and `Type`-keyed message routing
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::{AppState, CulvertServer};
pub use shutdown::ShutdownCoordinator;
