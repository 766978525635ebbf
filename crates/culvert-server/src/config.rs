//! Server configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the culvert server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Liveness probe interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Idle disconnect threshold in seconds.
    pub idle_timeout_secs: u64,
    /// Connection id that receives forwarded capture requests.
    pub forward_target: String,
    /// Per-connection outbound frame queue depth.
    pub send_queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            heartbeat_interval_secs: 20,
            idle_timeout_secs: 1800,
            forward_target: "android_rc".into(),
            send_queue_depth: 64,
        }
    }
}
