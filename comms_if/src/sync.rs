//! # Control Center Synchronisation Messages
//!
//! The vehicle acts as a server to the control center: the center polls each
//! vehicle on a request/reply socket, delivering setpoints and failure flags
//! with the request and receiving a telemetry snapshot in the reply.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::node::NodeId;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Coefficients of one quadratic lane curve, `a*x^2 + b*x + c`.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, Default, PartialEq)]
pub struct CurveCoef {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

/// The three fitted lane curves.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, Default, PartialEq)]
pub struct LaneCoefs {
    pub left: CurveCoef,
    pub right: CurveCoef,
    pub center: CurveCoef,
}

/// Request sent by the control center with each poll.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SyncRequest {
    /// Identity of the sender, expected to be the control center
    pub src: NodeId,

    /// Target velocity setpoint.
    ///
    /// Units: meters/second
    pub tar_vel_ms: f64,

    /// Target inter-vehicle distance setpoint.
    ///
    /// Units: meters
    pub tar_dist_m: f64,

    /// Encoder failure injection/declaration
    pub fi_encoder: bool,

    /// Camera failure injection/declaration
    pub fi_camera: bool,

    /// Lidar failure injection/declaration
    pub fi_lidar: bool,
}

/// Telemetry snapshot returned by the vehicle in reply to each poll.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SyncReply {
    /// Identity of the replying vehicle
    pub src: NodeId,

    /// Current vehicle velocity from odometry.
    ///
    /// Units: meters/second
    pub cur_vel_ms: f64,

    /// Fused distance to the vehicle ahead.
    ///
    /// Units: meters
    pub cur_dist_m: f64,

    /// Current steering angle.
    ///
    /// Units: degrees
    pub cur_angle_deg: f64,

    /// The fitted lane curves
    pub coef: LaneCoefs,
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reply_round_trip() {
        // A reply serialised and parsed back must reproduce the snapshot
        // values bit for bit.
        let reply = SyncReply {
            src: NodeId::Fv1,
            cur_vel_ms: 0.4378912,
            cur_dist_m: 0.81234,
            cur_angle_deg: -3.25,
            coef: LaneCoefs {
                left: CurveCoef {
                    a: 0.0013,
                    b: -0.42,
                    c: 112.6,
                },
                right: CurveCoef {
                    a: -0.0009,
                    b: 0.38,
                    c: 515.2,
                },
                center: CurveCoef {
                    a: 0.0002,
                    b: -0.02,
                    c: 313.9,
                },
            },
        };

        let json = serde_json::to_string(&reply).unwrap();
        let parsed: SyncReply = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, reply);
    }

    #[test]
    fn test_request_parse() {
        let json = serde_json::to_string(&SyncRequest {
            src: NodeId::Cc,
            tar_vel_ms: 0.5,
            tar_dist_m: 0.8,
            fi_encoder: false,
            fi_camera: true,
            fi_lidar: false,
        })
        .unwrap();

        let parsed: SyncRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.src, NodeId::Cc);
        assert!(parsed.fi_camera);
        assert!(!parsed.fi_lidar);
    }
}
