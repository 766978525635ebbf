//! WebSocket connection handling: per-client state, the id-keyed
//! registry, liveness supervision, and message routing.

pub mod connection;
pub mod heartbeat;
pub mod registry;
pub mod router;

pub use connection::{ClientConnection, Frame};
pub use heartbeat::{HeartbeatResult, HeartbeatSupervisor, run_heartbeat};
pub use registry::ConnectionRegistry;
pub use router::Router;
