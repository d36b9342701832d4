//! # Image Relay Messages
//!
//! On-demand rear-camera handoff between consecutive vehicles. The sending
//! vehicle compresses its rear view and pushes it over a request/reply
//! channel; the receiving vehicle decodes it and republishes it locally.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{serde::ts_milliseconds, DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::NodeId;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Capacity of the compressed image buffer in bytes.
///
/// Compressed frames larger than this are rejected by the sender rather than
/// truncated into a corrupt frame.
pub const MAX_COMP_IMAGE_BYTES: usize = 393_216;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A compressed rear-camera frame in flight between two vehicles.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RelayFrame {
    /// The vehicle whose rear camera produced this frame
    pub src: NodeId,

    /// The vehicle this frame is destined for
    pub dst: NodeId,

    /// Number of bytes of compressed data
    pub len: usize,

    /// UTC timestamp at which the frame was sent, used by the receiver to
    /// measure round-trip latency
    #[serde(with = "ts_milliseconds")]
    pub sent_at: DateTime<Utc>,

    /// JPEG-compressed image data, at most [`MAX_COMP_IMAGE_BYTES`] bytes
    pub data: Vec<u8>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Response returned by the receiving vehicle for each relayed frame.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, Eq, PartialEq)]
pub enum RelayResponse {
    /// The frame was decoded and republished
    FrameOk,

    /// The frame could not be decoded and was dropped
    DecodeFailed,
}
