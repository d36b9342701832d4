//! # Image Relay
//!
//! On-demand rear-camera handoff between consecutive vehicles. The request
//! side compresses the latest rear frame on a fixed short interval and
//! pushes it to the vehicle behind; the reply side decodes inbound frames,
//! republishes them on the local bus, and tracks the rolling round-trip
//! latency. Both loops are started lazily by the control loop, exactly once,
//! when their guard condition first turns true.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use image::{Bgr, DynamicImage, ImageBuffer, ImageOutputFormat};
use log::{error, info, trace, warn};
use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use comms_if::{
    net::{zmq, MonitoredSocket, SocketOptions},
    node::VehicleRole,
    relay::{RelayFrame, RelayResponse, MAX_COMP_IMAGE_BYTES},
    sensor::SensorFrame,
    topic,
};

use crate::{ctrl_state::CtrlState, sensor_inbox::SensorInbox};
use util::{
    archive::Archiver,
    session::{self, Session},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Interval between relay iterations on both sides.
///
/// Units: milliseconds
pub const RELAY_INTERVAL_MS: u64 = 10;

/// JPEG quality factor used when compressing the rear frame.
pub const JPEG_QUALITY: u8 = 80;

/// Number of round-trip samples after which the latency accumulator resets,
/// bounding numerical drift in the running average.
pub const RTT_RESET_SAMPLES: u32 = 3000;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Rolling round-trip latency tracker.
#[derive(Debug, Default)]
pub struct RttTracker {
    accum_ms: f64,
    samples: u32,
}

/// One row of the round-trip run log.
#[derive(Serialize)]
struct RttRecord {
    time_s: f64,
    rtt_ms: f64,
    cur_dist_m: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("The rear frame's dimensions do not match its pixel data")]
    BadFrameGeometry,

    #[error("Could not encode the rear frame: {0}")]
    EncodeError(image::ImageError),

    #[error("Could not decode the relayed frame: {0}")]
    DecodeError(image::ImageError),

    #[error("Compressed image ({0} bytes) exceeds the relay buffer ({1} bytes)")]
    OversizeFrame(usize, usize),

    #[error("This vehicle has no successor to relay images to")]
    NoSuccessor,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RttTracker {
    /// Fold one round-trip sample into the tracker, returning the running
    /// average.
    pub fn push(&mut self, rtt_ms: f64) -> f64 {
        self.samples += 1;
        self.accum_ms += rtt_ms;

        let avg = self.accum_ms / self.samples as f64;

        if self.samples > RTT_RESET_SAMPLES {
            self.accum_ms = 0.0;
            self.samples = 0;
        }

        avg
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Compress a raw BGR8 frame into a JPEG buffer.
pub fn compress_frame(frame: &SensorFrame) -> Result<Vec<u8>, RelayError> {
    let buffer: ImageBuffer<Bgr<u8>, Vec<u8>> =
        ImageBuffer::from_raw(frame.width, frame.height, frame.data.clone())
            .ok_or(RelayError::BadFrameGeometry)?;

    let rgb = DynamicImage::ImageBgr8(buffer).to_rgb8();

    let mut data = Vec::new();
    DynamicImage::ImageRgb8(rgb)
        .write_to(&mut data, ImageOutputFormat::Jpeg(JPEG_QUALITY))
        .map_err(RelayError::EncodeError)?;

    Ok(data)
}

/// Decode a relayed JPEG buffer back into a raw BGR8 frame.
///
/// The frame keeps the sender's timestamp so downstream consumers see the
/// acquisition time, not the relay time.
pub fn decode_frame(data: &[u8], sent_at: DateTime<Utc>) -> Result<SensorFrame, RelayError> {
    let image = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .map_err(RelayError::DecodeError)?;

    let bgr = image.to_bgr8();

    Ok(SensorFrame {
        timestamp: sent_at,
        width: bgr.width(),
        height: bgr.height(),
        data: bgr.into_raw(),
    })
}

/// Compress the rear frame and wrap it for the wire.
///
/// Payloads over the bounded buffer capacity are rejected rather than
/// truncated into a corrupt frame.
pub fn build_relay_frame(role: VehicleRole, frame: &SensorFrame) -> Result<RelayFrame, RelayError> {
    let dst = role.relay_successor().ok_or(RelayError::NoSuccessor)?;

    let data = compress_frame(frame)?;
    check_payload_size(data.len())?;

    Ok(RelayFrame {
        src: role.node_id(),
        dst,
        len: data.len(),
        sent_at: Utc::now(),
        data,
    })
}

/// Run the relay request loop until the run flag clears.
///
/// Every iteration snapshots the rear frame, compresses it, and pushes it to
/// the vehicle behind, waiting for the acknowledgement before the next send.
pub fn request_loop(
    ctx: zmq::Context,
    endpoint: String,
    role: VehicleRole,
    inbox: Arc<SensorInbox>,
    run: Arc<AtomicBool>,
) {
    // Create the socket options
    let socket_options = SocketOptions {
        block_on_first_connect: false,
        connect_timeout: 1000,
        heartbeat_ivl: 500,
        heartbeat_ttl: 1000,
        heartbeat_timeout: 1000,
        linger: 1,
        recv_timeout: 10,
        send_timeout: 10,
        req_correlate: true,
        req_relaxed: true,
        ..Default::default()
    };

    let socket = match MonitoredSocket::new(&ctx, zmq::REQ, socket_options, &endpoint) {
        Ok(s) => s,
        Err(e) => {
            error!("Could not open the relay request socket: {}", e);
            return;
        }
    };

    let mut req_count: u32 = 0;

    info!("Image relay request loop started");

    while run.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(RELAY_INTERVAL_MS));

        let frame = match inbox.snapshot_rear_frame() {
            Some(f) => f,
            None => continue,
        };

        let relay_frame = match build_relay_frame(role, &frame) {
            Ok(f) => f,
            Err(e @ RelayError::OversizeFrame(_, _)) => {
                warn!("{}, frame skipped", e);
                continue;
            }
            Err(e) => {
                warn!("Could not prepare the rear frame for relay: {}", e);
                continue;
            }
        };

        let msg = match serde_json::to_string(&relay_frame) {
            Ok(s) => s,
            Err(e) => {
                warn!("Could not serialize the relay frame: {}", e);
                continue;
            }
        };

        if !socket.connected() {
            continue;
        }

        if let Err(e) = socket.send(&msg, 0) {
            warn!("Could not send the relay frame: {}", e);
            continue;
        }

        // Wait for the acknowledgement before the next send
        match socket.recv_string(0) {
            Ok(Ok(_)) => {
                req_count += 1;
                trace!("Relay frame {} acknowledged", req_count);
            }
            Ok(Err(_)) => warn!("Non UTF-8 acknowledgement from the relay server"),
            Err(zmq::Error::EAGAIN) => (),
            Err(e) => warn!("Could not receive the relay acknowledgement: {}", e),
        }
    }

    info!("Image relay request loop stopped");
}

/// Run the relay reply loop until the run flag clears.
///
/// Each inbound frame is decoded, republished on the local image bus, and
/// folded into the round-trip latency log.
pub fn reply_loop(
    ctx: zmq::Context,
    rep_endpoint: String,
    pub_endpoint: String,
    state: Arc<CtrlState>,
    session: Session,
    run: Arc<AtomicBool>,
) {
    // Create the reply socket
    let rep_options = SocketOptions {
        block_on_first_connect: false,
        bind: true,
        linger: 1,
        recv_timeout: 10,
        send_timeout: 10,
        ..Default::default()
    };

    let rep_socket = match MonitoredSocket::new(&ctx, zmq::REP, rep_options, &rep_endpoint) {
        Ok(s) => s,
        Err(e) => {
            error!("Could not open the relay reply socket: {}", e);
            return;
        }
    };

    // Create the local republish socket
    let pub_options = SocketOptions {
        block_on_first_connect: false,
        bind: true,
        linger: 1,
        send_timeout: 10,
        ..Default::default()
    };

    let pub_socket = match MonitoredSocket::new(&ctx, zmq::PUB, pub_options, &pub_endpoint) {
        Ok(s) => s,
        Err(e) => {
            error!("Could not open the relay republish socket: {}", e);
            return;
        }
    };

    // Open the round-trip run log
    let mut archiver = match Archiver::from_numbered(&session, "rtt_log") {
        Ok(a) => a,
        Err(e) => {
            error!("Could not open the round-trip log: {}", e);
            return;
        }
    };

    let mut tracker = RttTracker::default();

    info!("Image relay reply loop started");

    while run.load(Ordering::Relaxed) {
        let msg = match rep_socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => {
                warn!("Non UTF-8 relay frame");
                send_response(&rep_socket, RelayResponse::DecodeFailed);
                continue;
            }
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                warn!("Could not receive a relay frame: {}", e);
                continue;
            }
        };

        let relay_frame: RelayFrame = match serde_json::from_str(&msg) {
            Ok(f) => f,
            Err(e) => {
                warn!("Could not parse the relay frame: {}", e);
                send_response(&rep_socket, RelayResponse::DecodeFailed);
                continue;
            }
        };

        match decode_frame(&relay_frame.data, relay_frame.sent_at) {
            Ok(frame) => {
                // Republish the preceding vehicle's view on the local bus
                match serde_json::to_string(&frame) {
                    Ok(s) => {
                        if let Err(e) = pub_socket.send(&format!("{} {}", topic::PRECEDING, s), 0)
                        {
                            warn!("Could not republish the relayed frame: {}", e);
                        }
                    }
                    Err(e) => warn!("Could not serialize the relayed frame: {}", e),
                }

                send_response(&rep_socket, RelayResponse::FrameOk);

                // Fold the sample into the latency log
                let rtt_ms = (Utc::now() - relay_frame.sent_at).num_milliseconds() as f64;
                let avg_ms = tracker.push(rtt_ms);
                trace!("Relay round trip {:.1} ms (avg {:.1} ms)", rtt_ms, avg_ms);

                let record = RttRecord {
                    time_s: session::get_elapsed_seconds(),
                    rtt_ms,
                    cur_dist_m: state.lead().distance_m,
                };
                if let Err(e) = archiver.serialise(record) {
                    warn!("Could not write the round-trip log: {}", e);
                }
            }
            Err(e) => {
                // The decode failure costs this cycle's image only
                warn!("{}", e);
                send_response(&rep_socket, RelayResponse::DecodeFailed);
            }
        }

        thread::sleep(Duration::from_millis(RELAY_INTERVAL_MS));
    }

    info!("Image relay reply loop stopped");
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Reject compressed payloads that would not fit the bounded relay buffer.
fn check_payload_size(len: usize) -> Result<(), RelayError> {
    if len > MAX_COMP_IMAGE_BYTES {
        return Err(RelayError::OversizeFrame(len, MAX_COMP_IMAGE_BYTES));
    }

    Ok(())
}

/// Send the acknowledgement for the frame just received.
fn send_response(socket: &MonitoredSocket, response: RelayResponse) {
    let response_str = match serde_json::to_string(&response) {
        Ok(s) => s,
        Err(e) => {
            warn!("Could not serialize the relay response: {}", e);
            return;
        }
    };

    if let Err(e) = socket.send(&response_str, 0) {
        warn!("Could not send the relay response: {}", e);
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rtt_running_average() {
        let mut tracker = RttTracker::default();

        assert!((tracker.push(10.0) - 10.0).abs() < 1e-9);
        assert!((tracker.push(20.0) - 15.0).abs() < 1e-9);
        assert!((tracker.push(30.0) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_rtt_accumulator_resets() {
        let mut tracker = RttTracker::default();

        for _ in 0..(RTT_RESET_SAMPLES + 1) {
            tracker.push(10.0);
        }

        // The accumulator has been cleared, so the next sample stands alone
        let avg = tracker.push(50.0);
        assert!((avg - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_compress_decode_round_trip() {
        let mut data = Vec::with_capacity(8 * 8 * 3);
        for i in 0..(8 * 8 * 3) {
            data.push((i % 251) as u8);
        }

        let frame = SensorFrame {
            timestamp: Utc::now(),
            width: 8,
            height: 8,
            data,
        };

        let compressed = compress_frame(&frame).unwrap();
        assert!(!compressed.is_empty());

        let decoded = decode_frame(&compressed, frame.timestamp).unwrap();
        assert_eq!(decoded.width, 8);
        assert_eq!(decoded.height, 8);
        assert_eq!(decoded.data.len(), 8 * 8 * 3);
        assert_eq!(decoded.timestamp, frame.timestamp);
    }

    #[test]
    fn test_bad_geometry_rejected() {
        let frame = SensorFrame {
            timestamp: Utc::now(),
            width: 8,
            height: 8,
            data: vec![0; 10],
        };

        assert!(matches!(
            compress_frame(&frame),
            Err(RelayError::BadFrameGeometry)
        ));
    }

    #[test]
    fn test_oversize_payload_rejected() {
        assert!(check_payload_size(MAX_COMP_IMAGE_BYTES).is_ok());

        assert!(matches!(
            check_payload_size(MAX_COMP_IMAGE_BYTES + 1),
            Err(RelayError::OversizeFrame(_, _))
        ));
    }

    #[test]
    fn test_tail_vehicle_has_no_relay_target() {
        let frame = SensorFrame {
            timestamp: Utc::now(),
            width: 8,
            height: 8,
            data: vec![0; 8 * 8 * 3],
        };

        assert!(matches!(
            build_relay_frame(VehicleRole::Fv2, &frame),
            Err(RelayError::NoSuccessor)
        ));
    }

    #[test]
    fn test_relay_frame_built_with_length() {
        let frame = SensorFrame {
            timestamp: Utc::now(),
            width: 8,
            height: 8,
            data: vec![128; 8 * 8 * 3],
        };

        let relay_frame = build_relay_frame(VehicleRole::Lv, &frame).unwrap();
        assert_eq!(relay_frame.src, comms_if::node::NodeId::Lv);
        assert_eq!(relay_frame.dst, comms_if::node::NodeId::Fv1);
        assert_eq!(relay_frame.len, relay_frame.data.len());
        assert!(relay_frame.len <= MAX_COMP_IMAGE_BYTES);
    }
}
