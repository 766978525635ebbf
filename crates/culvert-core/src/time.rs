//! Wire timestamp handling.
//!
//! Every `Datetime` on the wire is `yyyy-MM-dd HH:mm:ss` in the robot's
//! deployment zone (Asia/Seoul). Document ids reuse the same instant in a
//! compact `yyyyMMdd_HHmmss` form.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Asia::Seoul;
use chrono_tz::Tz;
use thiserror::Error;

/// Wire format for `Datetime` fields.
pub const WIRE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Compact format used inside generated document ids.
pub const ID_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Errors from parsing wire timestamps.
#[derive(Debug, Error)]
pub enum TimeError {
    #[error("invalid datetime {value:?}: {source}")]
    Parse {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("datetime {0:?} is ambiguous or nonexistent in Asia/Seoul")]
    Ambiguous(String),
}

/// Current instant formatted for the wire.
pub fn now_wire() -> String {
    format_wire(&Utc::now().with_timezone(&Seoul))
}

/// Format an instant for the wire.
pub fn format_wire(instant: &DateTime<Tz>) -> String {
    instant.format(WIRE_FORMAT).to_string()
}

/// Parse a wire `Datetime` into a zoned instant.
pub fn parse_wire(value: &str) -> Result<DateTime<Tz>, TimeError> {
    let naive = NaiveDateTime::parse_from_str(value, WIRE_FORMAT).map_err(|source| {
        TimeError::Parse {
            value: value.to_string(),
            source,
        }
    })?;
    Seoul
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| TimeError::Ambiguous(value.to_string()))
}
