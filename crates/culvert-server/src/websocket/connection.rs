//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use culvert_enrich::ReplyTarget;

/// Outbound frame for a connection's write task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text payload (reply or forwarded message).
    Text(Arc<String>),
    /// Liveness probe.
    Ping,
}

/// Represents a connected WebSocket client.
pub struct ClientConnection {
    /// Client-chosen connection ID (for example `android_rc`).
    pub id: String,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Frame>,
    /// When the last inbound frame arrived.
    last_activity: Mutex<Instant>,
    /// Count of frames dropped due to full channel.
    dropped_frames: AtomicU64,
}

impl ClientConnection {
    pub fn new(id: String, tx: mpsc::Sender<Frame>) -> Self {
        Self {
            id,
            tx,
            last_activity: Mutex::new(Instant::now()),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Queue a frame for the write task.
    ///
    /// Returns `false` if the channel is full or closed, and increments
    /// the dropped frame counter.
    pub fn send(&self, frame: Frame) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Queue a text payload.
    pub fn send_str(&self, text: impl Into<String>) -> bool {
        self.send(Frame::Text(Arc::new(text.into())))
    }

    /// Queue a liveness probe. Failures are the caller's to ignore.
    pub fn send_ping(&self) -> bool {
        self.send(Frame::Ping)
    }

    /// Total frames dropped for this connection. Reported in aggregate
    /// by the `/health` endpoint.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Record inbound traffic (text, pong, or ping).
    pub fn mark_active(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last inbound frame (or connection establishment).
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }
}

impl ReplyTarget for ClientConnection {
    fn send_text(&self, text: String) -> bool {
        self.send(Frame::Text(Arc::new(text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection() -> (ClientConnection, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new("conn_1".into(), tx);
        (conn, rx)
    }

    #[test]
    fn create_connection() {
        let (conn, _rx) = make_connection();
        assert_eq!(conn.id, "conn_1");
        assert_eq!(conn.drop_count(), 0);
    }

    #[tokio::test]
    async fn send_text_frame() {
        let (conn, mut rx) = make_connection();
        assert!(conn.send_str("hello"));
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame, Frame::Text(Arc::new("hello".into())));
    }

    #[tokio::test]
    async fn send_ping_frame() {
        let (conn, mut rx) = make_connection();
        assert!(conn.send_ping());
        assert_eq!(rx.recv().await.unwrap(), Frame::Ping);
    }

    #[tokio::test]
    async fn send_to_closed_channel_returns_false() {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new("conn_2".into(), tx);
        drop(rx);
        assert!(!conn.send_str("hello"));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_to_full_channel_returns_false() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ClientConnection::new("conn_3".into(), tx);
        assert!(conn.send_str("msg1"));
        assert!(!conn.send_str("msg2"));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn mark_active_resets_idle() {
        let (conn, _rx) = make_connection();
        std::thread::sleep(Duration::from_millis(10));
        assert!(conn.idle_for() >= Duration::from_millis(10));
        conn.mark_active();
        assert!(conn.idle_for() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn reply_target_sends_text() {
        let (conn, mut rx) = make_connection();
        let target: &dyn ReplyTarget = &conn;
        assert!(target.send_text("reply".into()));
        assert_eq!(rx.recv().await.unwrap(), Frame::Text(Arc::new("reply".into())));
    }
}
