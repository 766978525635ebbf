//! Bounded background pipeline for slow enrichment work.
//!
//! Completion calls and URL signing never run on the connection read
//! path. Jobs are queued on a bounded channel and drained by a small
//! fixed pool of workers; a full queue rejects the job rather than
//! blocking the caller. A failed job affects only its own reply and is
//! never retried.

use std::sync::Arc;

use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use culvert_blob::{BlobError, BlobStore, GsUri};
use culvert_core::messages::{CapAnalysis, SttResult};
use culvert_core::time;
use culvert_llm::{ChatMessage, CompletionClient, LlmError};
use culvert_storage::IngestService;

use crate::extract;
use crate::memory::SessionMemory;
use crate::prompts;

/// Signed URL lifetime for images handed to the vision model.
const ANALYSIS_URL_TTL: std::time::Duration = std::time::Duration::from_secs(1800);

/// Outbound half of a client connection, as seen by the workers.
///
/// Implementations must not block; a send to a closed or backlogged
/// connection returns `false` and the reply is dropped.
pub trait ReplyTarget: Send + Sync {
    fn send_text(&self, text: String) -> bool;
}

#[derive(Debug, Error)]
enum AnalysisError {
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

enum Job {
    TextQuery {
        reply: Arc<dyn ReplyTarget>,
        client_id: String,
        text: String,
        raw_inbound: Value,
        datetime: String,
    },
    ImageAnalysis {
        reply: Arc<dyn ReplyTarget>,
        ack: String,
        message: Value,
    },
}

struct WorkerCtx {
    memory: Arc<SessionMemory>,
    llm: Arc<dyn CompletionClient>,
    ingest: Arc<IngestService>,
    blob: Arc<dyn BlobStore>,
}

/// Handle for submitting enrichment jobs.
pub struct Pipeline {
    jobs: mpsc::Sender<Job>,
}

impl Pipeline {
    /// Spawn `workers` tasks draining a queue of depth `queue_capacity`.
    ///
    /// Workers exit when every `Pipeline` handle has been dropped and the
    /// queue has drained.
    pub fn spawn(
        workers: usize,
        queue_capacity: usize,
        memory: Arc<SessionMemory>,
        llm: Arc<dyn CompletionClient>,
        ingest: Arc<IngestService>,
        blob: Arc<dyn BlobStore>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let ctx = Arc::new(WorkerCtx {
            memory,
            llm,
            ingest,
            blob,
        });

        for worker in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let ctx = Arc::clone(&ctx);
            drop(tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    run_job(&ctx, job).await;
                }
                debug!(worker, "enrichment worker exiting");
            }));
        }

        Self { jobs: tx }
    }

    /// Queue a spoken-query job. Returns `false` if the message has no
    /// usable `Text` or the queue is full.
    pub fn submit_text_query(
        &self,
        reply: Arc<dyn ReplyTarget>,
        client_id: &str,
        message: &Value,
    ) -> bool {
        let Some(text) = culvert_core::text_field(message, "Text") else {
            debug!(client_id, "skipping query: empty Text");
            return false;
        };
        // Reply timestamp is fixed at submission, not at completion.
        let job = Job::TextQuery {
            reply,
            client_id: client_id.to_string(),
            text: text.to_string(),
            raw_inbound: message.clone(),
            datetime: time::now_wire(),
        };
        self.enqueue(job)
    }

    /// Queue an image-analysis job for a freshly persisted photo.
    pub fn submit_image_analysis(
        &self,
        reply: Arc<dyn ReplyTarget>,
        ack: String,
        message: Value,
    ) -> bool {
        self.enqueue(Job::ImageAnalysis {
            reply,
            ack,
            message,
        })
    }

    fn enqueue(&self, job: Job) -> bool {
        match self.jobs.try_send(job) {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, "enrichment queue rejected job");
                false
            }
        }
    }
}

async fn run_job(ctx: &WorkerCtx, job: Job) {
    match job {
        Job::TextQuery {
            reply,
            client_id,
            text,
            raw_inbound,
            datetime,
        } => run_text_query(ctx, reply.as_ref(), &client_id, &text, raw_inbound, datetime).await,
        Job::ImageAnalysis {
            reply,
            ack,
            message,
        } => run_image_analysis(ctx, reply.as_ref(), &ack, &message).await,
    }
}

/// Answer a spoken query with the conversation window as context, then
/// persist one combined question/answer record.
async fn run_text_query(
    ctx: &WorkerCtx,
    reply: &dyn ReplyTarget,
    client_id: &str,
    text: &str,
    raw_inbound: Value,
    datetime: String,
) {
    let mut turns = vec![ChatMessage::system(prompts::TEXT_SYSTEM)];
    turns.extend(ctx.memory.history(client_id));
    turns.push(ChatMessage::user(text));

    let answer = match ctx.llm.complete(&turns).await {
        Ok(answer) => answer,
        Err(err) => {
            warn!(client_id, %err, "query completion failed");
            let fail = SttResult::new(datetime, format!("분석 실패: {err}"));
            let _ = reply.send_text(to_wire(&fail));
            return;
        }
    };

    let outbound = SttResult::new(datetime.clone(), answer.clone());
    if !reply.send_text(to_wire(&outbound)) {
        info!(client_id, "query answer not delivered");
    }

    let combined = format!("질문: {text}\n답변: {answer}");
    let wrapper = json!({
        "Type": "SttResult",
        "Datetime": datetime,
        "Text": combined,
        "raw_inbound": raw_inbound,
        "raw_outbound": serde_json::to_value(&outbound).unwrap_or(Value::Null),
    });
    if let Err(err) = ctx.ingest.handle(&wrapper.to_string()).await {
        warn!(client_id, %err, "combined record store failed");
    }

    ctx.memory.push_user(client_id, text);
    ctx.memory.push_assistant(client_id, answer);
}

/// Analyze a persisted photo. The correlation id and blob locator come
/// out of the storage acknowledgement; if either is missing the job is
/// abandoned with a log line and no reply.
async fn run_image_analysis(ctx: &WorkerCtx, reply: &dyn ReplyTarget, ack: &str, message: &Value) {
    let Some(cap_id) = extract::cap_id(ack) else {
        warn!(ack, "skipping analysis: no document id in ack");
        return;
    };
    let Some(gcs_uri) = extract::gcs_uri(ack)
        .or_else(|| culvert_core::text_field(message, "GcsUri"))
        .map(ToString::to_string)
    else {
        warn!(ack, "skipping analysis: no blob locator");
        return;
    };
    let datetime = culvert_core::text_field(message, "Datetime")
        .map_or_else(time::now_wire, ToString::to_string);

    match analyze(ctx, &gcs_uri).await {
        Ok((signed_url, result)) => {
            let record = json!({
                "Type": "Ai",
                "Datetime": datetime,
                "CapId": cap_id,
                "GcsUri": gcs_uri,
                "Url": signed_url,
                "Result": result,
            });
            if let Err(err) = ctx.ingest.handle(&record.to_string()).await {
                warn!(cap_id, %err, "analysis record store failed");
            }

            let resp = CapAnalysis::new(datetime, cap_id.to_string(), signed_url, result);
            if !reply.send_text(to_wire(&resp)) {
                info!(cap_id, "analysis result not delivered");
            }
        }
        Err(err) => {
            warn!(cap_id, %err, "image analysis failed");
            let fail = CapAnalysis::new(
                datetime,
                cap_id.to_string(),
                gcs_uri,
                format!("분석 실패: {err}"),
            );
            let _ = reply.send_text(to_wire(&fail));
        }
    }
}

async fn analyze(ctx: &WorkerCtx, gcs_uri: &str) -> Result<(String, String), AnalysisError> {
    let parsed = GsUri::parse(gcs_uri)?;
    let signed_url = ctx
        .blob
        .signed_download_url(&parsed.bucket, &parsed.object, ANALYSIS_URL_TTL)
        .await?;

    let turns = [
        ChatMessage::system(prompts::VISION_SYSTEM),
        ChatMessage::user_with_image(prompts::VISION_USER, signed_url.clone()),
    ];
    let result = ctx.llm.complete(&turns).await?;
    Ok((signed_url, result))
}

fn to_wire<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}
