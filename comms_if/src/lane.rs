//! # Lane Estimation Interface
//!
//! Request/response pair for the external lane estimation process, which
//! fits quadratic curves to the lane markings in a camera frame. The curve
//! fitting algorithm itself lives outside this software; only its wire
//! contract is defined here.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::sensor::{BoundingBox, SensorFrame};
use crate::sync::LaneCoefs;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Request sent to the lane estimator for one control cycle.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LaneRequest {
    /// The forward camera frame to fit against
    pub frame: SensorFrame,

    /// Current vehicle velocity, used to scale the steering gains.
    ///
    /// Units: meters/second
    pub cur_vel_ms: f64,

    /// Bounding box of the vehicle ahead, for occlusion-aware fitting
    pub bbox: BoundingBox,

    /// Row offset narrowing the region of interest, derived from the fused
    /// distance to the vehicle ahead. Zero leaves the region untouched.
    ///
    /// Units: pixels
    pub roi_offset_px: i32,
}

/// Response from the lane estimator.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LaneResponse {
    /// Steering angle demanded by the vision estimate.
    ///
    /// Units: degrees
    pub steer_angle_deg: f64,

    /// The fitted lane curves
    pub coef: LaneCoefs,

    /// Distance to the vehicle ahead estimated from the lane geometry, zero
    /// if no estimate is available.
    ///
    /// Units: meters
    pub est_dist_m: f64,
}
