//! Correlation-id extraction from storage acknowledgements.
//!
//! A persisted photo is acknowledged with a string embedding the document
//! id as `[Cap/<id>]` and the blob locator as `(gcs=<uri>)`. Image
//! analysis re-derives both from that string rather than plumbing them
//! through separately.

use std::sync::LazyLock;

use regex::Regex;

static CAP_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[Cap/(Cap_\d{8}_\d{6}_\d+)\]").unwrap());

static GCS_URI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(gcs=(gs://[^)]+)\)").unwrap());

/// Photo document id embedded in an acknowledgement, if present.
pub fn cap_id(ack: &str) -> Option<&str> {
    CAP_ID_RE.captures(ack).map(|c| c.get(1).map_or("", |m| m.as_str()))
}

/// Blob locator embedded in an acknowledgement, if present.
pub fn gcs_uri(ack: &str) -> Option<&str> {
    GCS_URI_RE.captures(ack).map(|c| c.get(1).map_or("", |m| m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_both_from_a_full_ack() {
        let ack = "stored [Cap/Cap_20250101_000001_1] (gcs=gs://bucket/obj.jpg)";
        assert_eq!(cap_id(ack), Some("Cap_20250101_000001_1"));
        assert_eq!(gcs_uri(ack), Some("gs://bucket/obj.jpg"));
    }

    #[test]
    fn id_requires_the_full_shape() {
        assert_eq!(cap_id("stored [Cap/Cap_123]"), None);
        assert_eq!(cap_id("stored [Ai/Ai_Cap_20250101_000001_1]"), None);
    }

    #[test]
    fn locator_stops_at_closing_paren() {
        let ack = "ok (gcs=gs://b/photos/20250101/x.jpg) trailing";
        assert_eq!(gcs_uri(ack), Some("gs://b/photos/20250101/x.jpg"));
    }

    #[test]
    fn absent_markers_yield_none() {
        assert_eq!(cap_id("stored [SttResult/SttResult_20250101_000001_1]"), None);
        assert_eq!(gcs_uri("no locator here"), None);
    }
}
