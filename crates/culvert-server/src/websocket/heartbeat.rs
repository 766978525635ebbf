//! Liveness probes and idle-timeout supervision.
//!
//! Every `interval` tick a Ping frame is queued for the client; a probe
//! that cannot be queued is ignored, since the idle timeout is the
//! authority on staleness. A connection with no inbound traffic for
//! `idle_timeout` is timed out and closed by its handler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::connection::ClientConnection;

/// Outcome of the liveness loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No inbound traffic within the idle window.
    TimedOut,
    /// The loop was cancelled externally (disconnect or shutdown).
    Cancelled,
}

/// Run liveness probes for a connection until it times out or the token
/// is cancelled.
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    interval: Duration,
    idle_timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut probe_interval = time::interval(interval);
    // The first tick fires immediately; skip it so a fresh connection is
    // not probed at registration time.
    probe_interval.tick().await;

    loop {
        tokio::select! {
            _ = probe_interval.tick() => {
                if connection.idle_for() >= idle_timeout {
                    return HeartbeatResult::TimedOut;
                }
                if !connection.send_ping() {
                    debug!(client_id = %connection.id, "probe not queued");
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

/// One cancellation token per supervised connection id.
///
/// Removal is exactly-once per token: `end` cancels and removes whatever
/// is stored, while `end_exact` only acts if the stored token is the one
/// the caller was issued, so a displaced handler's cleanup cannot cancel
/// its replacement.
pub struct HeartbeatSupervisor {
    tokens: Mutex<HashMap<String, Arc<CancellationToken>>>,
}

impl HeartbeatSupervisor {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Begin supervising a connection, cancelling any loop left over from
    /// a displaced registration under the same id.
    pub fn begin(&self, client_id: &str) -> Arc<CancellationToken> {
        let token = Arc::new(CancellationToken::new());
        if let Some(prior) = self
            .tokens
            .lock()
            .insert(client_id.to_string(), token.clone())
        {
            prior.cancel();
        }
        token
    }

    /// Stop supervising a connection. Returns `true` if this call did the
    /// cancel.
    pub fn end(&self, client_id: &str) -> bool {
        match self.tokens.lock().remove(client_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop supervising only if `token` is still the registered one.
    pub fn end_exact(&self, client_id: &str, token: &Arc<CancellationToken>) -> bool {
        let mut tokens = self.tokens.lock();
        match tokens.get(client_id) {
            Some(current) if Arc::ptr_eq(current, token) => {
                let _ = tokens.remove(client_id);
                token.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn supervised_count(&self) -> usize {
        self.tokens.lock().len()
    }
}

impl Default for HeartbeatSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
