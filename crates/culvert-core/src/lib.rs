//! # culvert-core
//!
//! Foundation types shared across the culvert control plane:
//!
//! - `Type`-discriminated wire envelopes and typed outbound replies
//! - the `yyyy-MM-dd HH:mm:ss` (Asia/Seoul) wire timestamp convention

#![deny(unsafe_code)]

pub mod messages;
pub mod time;

pub use messages::{
    message_kind, text_field, CapAnalysis, CtrlResult, ErrorReply, SttResult, CAP_REQUEST_ACK,
};
