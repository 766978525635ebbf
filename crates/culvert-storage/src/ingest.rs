//! Schema glue between wire events and the document store.
//!
//! Collections: `Cap` (photos), `SttResult` (combined question/answer
//! records), `Ai` (image-analysis results). Query kinds (`FindCap`,
//! `FindCaps`, `Find`) read the same collections back, re-signing photo
//! locators on the way out.
//!
//! Acknowledgement strings embed the generated document id as
//! `[<collection>/<id>]` and, for photos, the locator as `(gcs=<uri>)`.
//! The enrichment pipeline extracts its correlation identifiers from this
//! exact embedding.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng as _;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

use culvert_blob::{BlobError, BlobStore, GsUri};
use culvert_core::time::{self, TimeError};

use crate::ids::IdGenerator;
use crate::store::{DocumentStore, StoreError};

/// Default TTL for single-photo lookups.
const FIND_CAP_TTL_SECS: u64 = 900;

/// Default TTL for range-query photo URLs.
const FIND_CAPS_TTL_SECS: u64 = 600;

/// TTL for upload URLs issued by `CapUploadInit`.
const UPLOAD_TTL: Duration = Duration::from_secs(600);

/// Errors from handling a persistable message.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("missing 'Type' field")]
    MissingKind,
    #[error("unsupported Type: {0}")]
    UnsupportedKind(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error(transparent)]
    Datetime(#[from] TimeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error("no photo bucket configured")]
    MissingBucket,
    #[error("unknown document: {0}")]
    UnknownDocument(String),
    #[error("document {0} has no gcsUri")]
    MissingLocator(String),
    #[error("Collection must be SttResult or Ai, got {0}")]
    BadCollection(String),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Handles every message kind that reaches the storage layer.
pub struct IngestService {
    store: Arc<dyn DocumentStore>,
    blob: Arc<dyn BlobStore>,
    bucket: String,
    ids: IdGenerator,
}

impl IngestService {
    pub fn new(store: Arc<dyn DocumentStore>, blob: Arc<dyn BlobStore>, bucket: String) -> Self {
        Self {
            store,
            blob,
            bucket,
            ids: IdGenerator::new(),
        }
    }

    /// Route a raw wire message by its `Type` discriminator.
    ///
    /// Save kinds return an acknowledgement string; query kinds return a
    /// serialized reply object.
    pub async fn handle(&self, raw: &str) -> Result<String, IngestError> {
        let message: Value = serde_json::from_str(raw)?;
        if !message.is_object() {
            return Err(IngestError::NotAnObject);
        }
        let kind = culvert_core::message_kind(&message).ok_or(IngestError::MissingKind)?;

        match kind {
            "Cap" => self.save_cap(&message, raw).await,
            "SttResult" => self.save_stt_result(&message, raw).await,
            "Ai" => self.save_ai(&message, raw).await,
            "CapUploadInit" => self.init_cap_upload(&message).await,
            "FindCap" => self.find_cap(&message).await,
            "FindCaps" => self.find_caps_in_range(&message).await,
            "Find" => self.generic_range_query(&message).await,
            other => Err(IngestError::UnsupportedKind(other.to_string())),
        }
    }

    /// Photo metadata. The image bytes were already uploaded via a signed
    /// URL; only the locator and metadata land in the store.
    async fn save_cap(&self, message: &Value, raw: &str) -> Result<String, IngestError> {
        let datetime = required(message, "Datetime")?;
        let ext = required(message, "확장자")?;
        let gcs_uri = required(message, "GcsUri")?;
        let ts = time::parse_wire(datetime)?;

        let mut fields = json!({
            "type": "Cap",
            "datetime": datetime,
            "ext": ext.to_lowercase(),
            "gcsUri": gcs_uri,
            "raw": serde_json::from_str::<Value>(raw)?,
        });
        if let Some(lat) = message.get("Lang").and_then(Value::as_f64) {
            fields["latitude"] = json!(lat);
        }
        if let Some(lon) = message.get("Long").and_then(Value::as_f64) {
            fields["longitude"] = json!(lon);
        }

        let id = self.ids.next_id("Cap", &ts);
        self.store
            .put("Cap", &id, ts.with_timezone(&Utc), fields)
            .await?;
        info!(id, gcs_uri, "photo event stored");
        Ok(format!("{} (gcs={gcs_uri})", ack_saved("Cap", &id)))
    }

    /// Combined question/answer record; the per-turn exchange is never
    /// persisted separately.
    async fn save_stt_result(&self, message: &Value, raw: &str) -> Result<String, IngestError> {
        let datetime = required(message, "Datetime")?;
        let text = required(message, "Text")?;
        let ts = time::parse_wire(datetime)?;

        let fields = json!({
            "type": "SttResult",
            "datetime": datetime,
            "text": text,
            "raw": serde_json::from_str::<Value>(raw)?,
        });

        let id = self.ids.next_id("SttResult", &ts);
        self.store
            .put("SttResult", &id, ts.with_timezone(&Utc), fields)
            .await?;
        Ok(ack_saved("SttResult", &id))
    }

    /// Image-analysis record, keyed 1:1 with the photo it analyzed.
    async fn save_ai(&self, message: &Value, raw: &str) -> Result<String, IngestError> {
        let datetime = required(message, "Datetime")?;
        let cap_id = culvert_core::text_field(message, "CapId")
            .or_else(|| culvert_core::text_field(message, "ID"))
            .ok_or(IngestError::MissingField("CapId"))?;
        let result = required(message, "Result")?;
        let ts = time::parse_wire(datetime)?;

        let mut fields = json!({
            "type": "Ai",
            "datetime": datetime,
            "capId": cap_id,
            "result": result,
            "raw": serde_json::from_str::<Value>(raw)?,
        });
        if let Some(gcs_uri) = culvert_core::text_field(message, "GcsUri") {
            fields["gcsUri"] = json!(gcs_uri);
        }
        if let Some(url) = culvert_core::text_field(message, "Url") {
            fields["url"] = json!(url);
        }

        let id = format!("Ai_{cap_id}");
        self.store
            .put("Ai", &id, ts.with_timezone(&Utc), fields)
            .await?;
        Ok(ack_saved("Ai", &id))
    }

    /// Issue a signed upload URL and the `gs://` locator the client must
    /// echo back in its `Cap` event.
    async fn init_cap_upload(&self, message: &Value) -> Result<String, IngestError> {
        let ext = required(message, "확장자")?.to_lowercase();
        let datetime = required(message, "Datetime")?;
        if self.bucket.is_empty() {
            return Err(IngestError::MissingBucket);
        }

        let ts = time::parse_wire(datetime)?;
        let rnd: u32 = rand::rng().random_range(1000..10000);
        let object = format!(
            "photos/{}/{}_{rnd:04}.{ext}",
            ts.format("%Y%m%d"),
            ts.format("%H%M%S"),
        );
        let gcs_uri = format!("gs://{}/{object}", self.bucket);

        let content_type = if ext.eq_ignore_ascii_case("png") {
            "image/png"
        } else {
            "image/jpeg"
        };
        let upload_url = self
            .blob
            .signed_upload_url(&self.bucket, &object, UPLOAD_TTL, content_type)
            .await?;

        Ok(serde_json::to_string(&json!({
            "Type": "CapUploadInitResult",
            "UploadUrl": upload_url,
            "GcsUri": gcs_uri,
        }))?)
    }

    /// Single-photo lookup by `Id` or `GcsUri`; always answers with a
    /// freshly signed URL.
    async fn find_cap(&self, message: &Value) -> Result<String, IngestError> {
        let ttl = Duration::from_secs(
            message
                .get("TtlSec")
                .and_then(Value::as_u64)
                .unwrap_or(FIND_CAP_TTL_SECS),
        );

        let gcs_uri = match culvert_core::text_field(message, "GcsUri") {
            Some(uri) => uri.to_string(),
            None => {
                let id = culvert_core::text_field(message, "Id")
                    .ok_or(IngestError::MissingField("Id or GcsUri"))?;
                let doc = self
                    .store
                    .get("Cap", id)
                    .await?
                    .ok_or_else(|| IngestError::UnknownDocument(id.to_string()))?;
                doc.fields
                    .get("gcsUri")
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
                    .ok_or_else(|| IngestError::MissingLocator(id.to_string()))?
            }
        };

        let parsed = GsUri::parse(&gcs_uri)?;
        let url = self
            .blob
            .signed_download_url(&parsed.bucket, &parsed.object, ttl)
            .await?;

        Ok(serde_json::to_string(&json!({
            "Type": "CapGetResult",
            "GcsUri": gcs_uri,
            "Url": url,
        }))?)
    }

    /// Range query over photos; each row carries a signed URL.
    async fn find_caps_in_range(&self, message: &Value) -> Result<String, IngestError> {
        let from_str = required(message, "From")?;
        let to_str = required(message, "To")?;
        let limit = message
            .get("Limit")
            .and_then(Value::as_u64)
            .filter(|l| *l > 0)
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX));
        let ttl = Duration::from_secs(
            message
                .get("TtlSec")
                .and_then(Value::as_u64)
                .unwrap_or(FIND_CAPS_TTL_SECS),
        );

        let (from, to) = parse_range(from_str, to_str)?;
        let docs = self.store.query_range("Cap", from, to, limit).await?;

        let mut items = Vec::with_capacity(docs.len());
        for doc in docs {
            let mut item = json!({
                "id": doc.id,
                "datetime": doc.fields.get("datetime").cloned().unwrap_or(Value::Null),
            });
            if let Some(gcs_uri) = doc.fields.get("gcsUri").and_then(Value::as_str) {
                item["gcsUri"] = json!(gcs_uri);
                let parsed = GsUri::parse(gcs_uri)?;
                let url = self
                    .blob
                    .signed_download_url(&parsed.bucket, &parsed.object, ttl)
                    .await?;
                item["url"] = json!(url);
            }
            items.push(item);
        }

        Ok(serde_json::to_string(&json!({
            "Type": "FindCapResult",
            "From": from_str,
            "To": to_str,
            "Count": items.len(),
            "Items": items,
        }))?)
    }

    /// Generic range query over the non-photo collections, returning the
    /// raw documents as originally received.
    async fn generic_range_query(&self, message: &Value) -> Result<String, IngestError> {
        let collection = required(message, "Collection")?;
        if collection != "SttResult" && collection != "Ai" {
            return Err(IngestError::BadCollection(collection.to_string()));
        }
        let from_str = required(message, "From")?;
        let to_str = required(message, "To")?;
        let (from, to) = parse_range(from_str, to_str)?;

        let docs = self.store.query_range(collection, from, to, None).await?;
        let results: Vec<Value> = docs
            .into_iter()
            .filter_map(|d| d.fields.get("raw").cloned())
            .collect();

        Ok(serde_json::to_string(&json!({
            "Type": "FindResult",
            "Collection": collection,
            "From": from_str,
            "To": to_str,
            "Results": results,
        }))?)
    }
}

fn ack_saved(collection: &str, id: &str) -> String {
    format!("stored [{collection}/{id}]")
}

fn required<'a>(message: &'a Value, key: &'static str) -> Result<&'a str, IngestError> {
    culvert_core::text_field(message, key).ok_or(IngestError::MissingField(key))
}

fn parse_range(from: &str, to: &str) -> Result<(DateTime<Utc>, DateTime<Utc>), IngestError> {
    let from = time::parse_wire(from)?.with_timezone(&Utc);
    let to = time::parse_wire(to)?.with_timezone(&Utc);
    Ok((from, to))
}
