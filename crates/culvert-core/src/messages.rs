//! Wire message envelopes.
//!
//! Inbound messages are loose JSON objects discriminated by a required
//! `Type` field; they are inspected as `serde_json::Value` rather than
//! deserialized into an enum so that unknown kinds can be passed through
//! to the storage layer untouched. Outbound replies are typed structs that
//! serialize with the exact key casing the deployed clients expect.

use serde::Serialize;
use serde_json::Value;

/// Inbound message kinds handled directly by the router.
pub mod kind {
    /// Capture directive, relayed verbatim to the remote-control peer.
    pub const CAP_REQUEST: &str = "CapRequest";
    /// Spoken query text, handed to the enrichment pipeline.
    pub const STT: &str = "Stt";
    /// Photo metadata event; persistence of this kind triggers image analysis.
    pub const CAP: &str = "Cap";
    /// Control-lock acquire request.
    pub const CTRL_ACQUIRE: &str = "CtrlAcquire";
    /// Control-lock renew request.
    pub const CTRL_RENEW: &str = "CtrlRenew";
    /// Control-lock release request.
    pub const CTRL_RELEASE: &str = "CtrlRelease";
}

/// Local acknowledgement returned to the sender of a `CapRequest`.
pub const CAP_REQUEST_ACK: &str = "[CapRequest] forwarded to RC";

/// Read the `Type` discriminator of an inbound message.
pub fn message_kind(message: &Value) -> Option<&str> {
    message.get("Type")?.as_str()
}

/// Read a non-empty string field from an inbound message.
pub fn text_field<'a>(message: &'a Value, key: &str) -> Option<&'a str> {
    match message.get(key)?.as_str() {
        Some(s) if !s.trim().is_empty() => Some(s),
        _ => None,
    }
}

/// Reply to a spoken query (`Stt`), carrying the generated answer.
#[derive(Debug, Clone, Serialize)]
pub struct SttResult {
    #[serde(rename = "Type")]
    kind: &'static str,
    /// Outbound timestamp in wire format.
    #[serde(rename = "Datetime")]
    pub datetime: String,
    /// Answer text (or a failure description).
    #[serde(rename = "Text")]
    pub text: String,
}

impl SttResult {
    pub fn new(datetime: String, text: String) -> Self {
        Self {
            kind: "SttResult",
            datetime,
            text,
        }
    }
}

/// Image-analysis result for a persisted photo.
///
/// The mixed-case keys (`ID`, `gcsurl`, `result`) are historical and match
/// what the deployed remote-control client parses.
#[derive(Debug, Clone, Serialize)]
pub struct CapAnalysis {
    #[serde(rename = "Type")]
    kind: &'static str,
    #[serde(rename = "Datetime")]
    pub datetime: String,
    /// Document id of the analyzed photo.
    #[serde(rename = "ID")]
    pub cap_id: String,
    /// Signed download URL (or the raw `gs://` locator on failure).
    #[serde(rename = "gcsurl")]
    pub gcs_url: String,
    /// Analysis text (or a failure description).
    #[serde(rename = "result")]
    pub result: String,
}

impl CapAnalysis {
    pub fn new(datetime: String, cap_id: String, gcs_url: String, result: String) -> Self {
        Self {
            kind: "CapAnalysis",
            datetime,
            cap_id,
            gcs_url,
            result,
        }
    }
}

/// Outcome of a control-lock operation.
#[derive(Debug, Clone, Serialize)]
pub struct CtrlResult {
    #[serde(rename = "Type")]
    kind: &'static str,
    /// Whether the operation was granted.
    #[serde(rename = "Granted")]
    pub granted: bool,
    /// Current lock owner after the operation, if any.
    #[serde(rename = "Owner")]
    pub owner: Option<String>,
}

impl CtrlResult {
    pub fn new(granted: bool, owner: Option<String>) -> Self {
        Self {
            kind: "CtrlResult",
            granted,
            owner,
        }
    }
}

/// Local error reply for malformed or failed messages.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReply {
    #[serde(rename = "Type")]
    kind: &'static str,
    #[serde(rename = "Message")]
    pub message: String,
}

impl ErrorReply {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: "Error",
            message: message.into(),
        }
    }
}
