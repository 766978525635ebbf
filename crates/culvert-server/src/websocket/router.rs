//! Inbound message routing.
//!
//! One message in, at most one direct reply out. Slow work (completions,
//! signing) is queued on the enrichment pipeline, which replies through
//! the connection on its own schedule. A failure in any branch produces
//! an `Error` reply for that message only; the connection stays up.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use culvert_control::ControlLock;
use culvert_core::messages::{kind, CtrlResult, ErrorReply, CAP_REQUEST_ACK};
use culvert_enrich::Pipeline;
use culvert_storage::IngestService;

use super::connection::ClientConnection;
use super::registry::ConnectionRegistry;

/// Lock TTL applied when a request omits `TtlSec`.
const DEFAULT_LOCK_TTL_SECS: f64 = 3.0;

/// Routes inbound text messages by their `Type` discriminator.
pub struct Router {
    registry: Arc<ConnectionRegistry>,
    lock: Arc<ControlLock>,
    pipeline: Arc<Pipeline>,
    ingest: Arc<IngestService>,
    forward_target: String,
}

impl Router {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        lock: Arc<ControlLock>,
        pipeline: Arc<Pipeline>,
        ingest: Arc<IngestService>,
        forward_target: String,
    ) -> Self {
        Self {
            registry,
            lock,
            pipeline,
            ingest,
            forward_target,
        }
    }

    /// Handle one inbound text message, returning the direct reply to
    /// send back to the sender, if any.
    pub async fn dispatch(&self, sender: &Arc<ClientConnection>, raw: &str) -> Option<String> {
        let message: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                debug!(client_id = %sender.id, %err, "unparseable message");
                return Some(error_reply(format!("invalid JSON: {err}")));
            }
        };
        let Some(message_kind) = culvert_core::message_kind(&message).map(ToString::to_string)
        else {
            return Some(error_reply("missing 'Type' field"));
        };

        match message_kind.as_str() {
            kind::CAP_REQUEST => Some(self.forward_cap_request(sender, raw).await),
            kind::STT => {
                let reply: Arc<dyn culvert_enrich::ReplyTarget> = sender.clone();
                let _ = self.pipeline.submit_text_query(reply, &sender.id, &message);
                None
            }
            kind::CTRL_ACQUIRE => Some(self.ctrl_acquire(&message)),
            kind::CTRL_RENEW => Some(self.ctrl_renew(&message)),
            kind::CTRL_RELEASE => Some(self.ctrl_release(&message)),
            other => Some(self.persist(sender, other, raw, message).await),
        }
    }

    /// Relay the raw message to the remote-control peer verbatim; the
    /// sender gets a fixed local acknowledgement either way.
    async fn forward_cap_request(&self, sender: &Arc<ClientConnection>, raw: &str) -> String {
        match self.registry.get(&self.forward_target).await {
            Some(rc) => {
                if !rc.send_str(raw) {
                    warn!(target = %self.forward_target, "capture request not queued");
                }
            }
            None => {
                warn!(
                    client_id = %sender.id,
                    target = %self.forward_target,
                    "capture request dropped: target not connected"
                );
            }
        }
        CAP_REQUEST_ACK.to_string()
    }

    fn ctrl_acquire(&self, message: &Value) -> String {
        let Some(owner) = culvert_core::text_field(message, "Owner") else {
            return error_reply("missing 'Owner' field");
        };
        let ttl = ttl_secs(message);
        let priority = priority(message);
        let granted = self.lock.acquire(owner, ttl, priority);
        to_wire(&CtrlResult::new(granted, self.lock.current_owner()))
    }

    fn ctrl_renew(&self, message: &Value) -> String {
        let Some(owner) = culvert_core::text_field(message, "Owner") else {
            return error_reply("missing 'Owner' field");
        };
        let granted = self.lock.renew(owner, ttl_secs(message));
        to_wire(&CtrlResult::new(granted, self.lock.current_owner()))
    }

    fn ctrl_release(&self, message: &Value) -> String {
        let Some(owner) = culvert_core::text_field(message, "Owner") else {
            return error_reply("missing 'Owner' field");
        };
        self.lock.release(owner);
        to_wire(&CtrlResult::new(true, self.lock.current_owner()))
    }

    /// Hand the message to the storage layer. A persisted photo event
    /// additionally queues image analysis keyed off the acknowledgement.
    async fn persist(
        &self,
        sender: &Arc<ClientConnection>,
        message_kind: &str,
        raw: &str,
        message: Value,
    ) -> String {
        match self.ingest.handle(raw).await {
            Ok(ack) => {
                if message_kind == kind::CAP {
                    let reply: Arc<dyn culvert_enrich::ReplyTarget> = sender.clone();
                    let _ = self
                        .pipeline
                        .submit_image_analysis(reply, ack.clone(), message);
                }
                ack
            }
            Err(err) => {
                warn!(client_id = %sender.id, message_kind, %err, "message handling failed");
                error_reply(err.to_string())
            }
        }
    }
}

fn ttl_secs(message: &Value) -> f64 {
    message
        .get("TtlSec")
        .and_then(Value::as_f64)
        .unwrap_or(DEFAULT_LOCK_TTL_SECS)
}

fn priority(message: &Value) -> i32 {
    message
        .get("Priority")
        .and_then(Value::as_i64)
        .and_then(|p| i32::try_from(p).ok())
        .unwrap_or(0)
}

fn error_reply(message: impl Into<String>) -> String {
    to_wire(&ErrorReply::new(message))
}

fn to_wire<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::connection::Frame;
    use async_trait::async_trait;
    use culvert_blob::{BlobError, BlobStore};
    use culvert_enrich::SessionMemory;
    use culvert_llm::{ChatMessage, CompletionClient, LlmError};
    use culvert_storage::MemoryStore;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct StubLlm;

    #[async_trait]
    impl CompletionClient for StubLlm {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
            Ok("이상 없음".into())
        }
    }

    struct StubBlob;

    #[async_trait]
    impl BlobStore for StubBlob {
        async fn signed_download_url(
            &self,
            bucket: &str,
            object: &str,
            _ttl: Duration,
        ) -> Result<String, BlobError> {
            Ok(format!("https://signed.example/{bucket}/{object}"))
        }

        async fn signed_upload_url(
            &self,
            bucket: &str,
            object: &str,
            _ttl: Duration,
            _content_type: &str,
        ) -> Result<String, BlobError> {
            Ok(format!("https://upload.example/{bucket}/{object}"))
        }
    }

    struct Fixture {
        router: Router,
        registry: Arc<ConnectionRegistry>,
        store: Arc<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(MemoryStore::new());
        let ingest = Arc::new(IngestService::new(
            store.clone(),
            Arc::new(StubBlob),
            "bucket".into(),
        ));
        let pipeline = Arc::new(Pipeline::spawn(
            1,
            8,
            Arc::new(SessionMemory::new(12)),
            Arc::new(StubLlm),
            ingest.clone(),
            Arc::new(StubBlob),
        ));
        let router = Router::new(
            registry.clone(),
            Arc::new(ControlLock::new()),
            pipeline,
            ingest,
            "android_rc".into(),
        );
        Fixture {
            router,
            registry,
            store,
        }
    }

    fn make_connection(id: &str) -> (Arc<ClientConnection>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(32);
        (Arc::new(ClientConnection::new(id.into(), tx)), rx)
    }

    async fn recv_text(rx: &mut mpsc::Receiver<Frame>) -> String {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
        {
            Frame::Text(text) => text.as_ref().clone(),
            Frame::Ping => panic!("expected text frame"),
        }
    }

    #[tokio::test]
    async fn invalid_json_yields_error_reply() {
        let fx = fixture();
        let (sender, _rx) = make_connection("app");
        let reply = fx.router.dispatch(&sender, "not json").await.unwrap();
        let parsed: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["Type"], "Error");
    }

    #[tokio::test]
    async fn missing_kind_yields_error_reply() {
        let fx = fixture();
        let (sender, _rx) = make_connection("app");
        let reply = fx.router.dispatch(&sender, r#"{"Datetime":"x"}"#).await.unwrap();
        let parsed: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["Type"], "Error");
        assert_eq!(parsed["Message"], "missing 'Type' field");
    }

    #[tokio::test]
    async fn cap_request_forwards_verbatim_and_acks() {
        let fx = fixture();
        let (rc, mut rc_rx) = make_connection("android_rc");
        let _ = fx.registry.register(rc).await;
        let (sender, _rx) = make_connection("app");

        let raw = r#"{"Type":"CapRequest","Datetime":"2025-01-01 00:00:01"}"#;
        let reply = fx.router.dispatch(&sender, raw).await.unwrap();
        assert_eq!(reply, CAP_REQUEST_ACK);
        assert_eq!(recv_text(&mut rc_rx).await, raw);
    }

    #[tokio::test]
    async fn cap_request_without_target_still_acks() {
        let fx = fixture();
        let (sender, _rx) = make_connection("app");
        let raw = r#"{"Type":"CapRequest"}"#;
        let reply = fx.router.dispatch(&sender, raw).await.unwrap();
        assert_eq!(reply, CAP_REQUEST_ACK);
    }

    #[tokio::test]
    async fn stt_produces_no_direct_reply_but_answers_async() {
        let fx = fixture();
        let (sender, mut rx) = make_connection("voice");
        let raw = r#"{"Type":"Stt","Datetime":"2025-01-01 00:00:01","Text":"상태 확인"}"#;
        assert!(fx.router.dispatch(&sender, raw).await.is_none());

        let answer: Value = serde_json::from_str(&recv_text(&mut rx).await).unwrap();
        assert_eq!(answer["Type"], "SttResult");
        assert_eq!(answer["Text"], "이상 없음");
    }

    #[tokio::test]
    async fn ctrl_acquire_and_competing_priority() {
        let fx = fixture();
        let (sender, _rx) = make_connection("app");

        let reply = fx
            .router
            .dispatch(&sender, r#"{"Type":"CtrlAcquire","Owner":"android","TtlSec":30,"Priority":1}"#)
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["Type"], "CtrlResult");
        assert_eq!(parsed["Granted"], true);
        assert_eq!(parsed["Owner"], "android");

        // Equal priority does not preempt.
        let reply = fx
            .router
            .dispatch(&sender, r#"{"Type":"CtrlAcquire","Owner":"voice","TtlSec":30,"Priority":1}"#)
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["Granted"], false);
        assert_eq!(parsed["Owner"], "android");

        // Strictly greater priority does.
        let reply = fx
            .router
            .dispatch(&sender, r#"{"Type":"CtrlAcquire","Owner":"voice","TtlSec":30,"Priority":2}"#)
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["Granted"], true);
        assert_eq!(parsed["Owner"], "voice");
    }

    #[tokio::test]
    async fn ctrl_release_clears_own_lock() {
        let fx = fixture();
        let (sender, _rx) = make_connection("app");
        let _ = fx
            .router
            .dispatch(&sender, r#"{"Type":"CtrlAcquire","Owner":"android","TtlSec":30}"#)
            .await;
        let reply = fx
            .router
            .dispatch(&sender, r#"{"Type":"CtrlRelease","Owner":"android"}"#)
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["Granted"], true);
        assert!(parsed["Owner"].is_null());
    }

    #[tokio::test]
    async fn ctrl_without_owner_is_an_error() {
        let fx = fixture();
        let (sender, _rx) = make_connection("app");
        let reply = fx
            .router
            .dispatch(&sender, r#"{"Type":"CtrlAcquire","TtlSec":30}"#)
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["Type"], "Error");
    }

    #[tokio::test]
    async fn unknown_kind_goes_to_storage() {
        let fx = fixture();
        let (sender, _rx) = make_connection("robot");
        let raw = r#"{"Type":"SttResult","Datetime":"2025-01-01 00:00:01","Text":"질문: q\n답변: a"}"#;
        let reply = fx.router.dispatch(&sender, raw).await.unwrap();
        assert!(reply.starts_with("stored [SttResult/"));
        assert_eq!(fx.store.count("SttResult"), 1);
    }

    #[tokio::test]
    async fn cap_persist_acks_and_triggers_analysis() {
        let fx = fixture();
        let (sender, mut rx) = make_connection("robot");
        let raw = r#"{"Type":"Cap","Datetime":"2025-01-01 00:00:01","확장자":"jpg","GcsUri":"gs://b/o.jpg"}"#;
        let reply = fx.router.dispatch(&sender, raw).await.unwrap();
        assert_eq!(reply, "stored [Cap/Cap_20250101_000001_1] (gcs=gs://b/o.jpg)");

        // Analysis reply arrives through the connection asynchronously.
        let analysis: Value = serde_json::from_str(&recv_text(&mut rx).await).unwrap();
        assert_eq!(analysis["Type"], "CapAnalysis");
        assert_eq!(analysis["ID"], "Cap_20250101_000001_1");
    }

    #[tokio::test]
    async fn storage_failure_yields_error_reply() {
        let fx = fixture();
        let (sender, _rx) = make_connection("robot");
        let raw = r#"{"Type":"Cap","Datetime":"2025-01-01 00:00:01","확장자":"jpg"}"#;
        let reply = fx.router.dispatch(&sender, raw).await.unwrap();
        let parsed: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["Type"], "Error");
        assert_eq!(fx.store.count("Cap"), 0);
    }
}
