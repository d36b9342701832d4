//! # Control Messages
//!
//! Command and telemetry messages exchanged with the local actuator node,
//! plus the control-center mode definitions.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Sentinel error code reported once the lidar failure flag has been raised,
/// replacing whatever code the hardware produced.
pub const LIDAR_ERR_SENTINEL: u32 = 0x8000_8002;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Operating mode commanded by the control center.
///
/// Only meaningful on the lead vehicle; followers take their setpoints from
/// the control center verbatim and never interpret this mode.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, Eq, PartialEq)]
pub enum CcMode {
    /// Setpoints from the control center are passed through unmodified
    Target,

    /// Setpoints are clamped to the configured remote-mode ceilings
    RemoteCommand,

    /// The vehicle is commanded to a standstill
    Stop,
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Command pushed up from the local actuator node.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DownstreamCmd {
    /// Manual-vs-auto latch
    pub alpha: bool,

    /// Local actuator node mode
    pub lrc_mode: u8,

    /// Control center mode, forwarded by the actuator node
    pub crc_mode: CcMode,

    /// Current vehicle velocity from odometry.
    ///
    /// Units: meters/second
    pub cur_vel_ms: f64,

    /// Target velocity for follower vehicles.
    ///
    /// Units: meters/second
    pub tar_vel_ms: f64,

    /// Target inter-vehicle distance for follower vehicles.
    ///
    /// Units: meters
    pub tar_dist_m: f64,

    /// True if this vehicle should stream its rear camera to the vehicle
    /// behind it
    pub send_rear_image: bool,
}

/// Actuator command published once per control cycle.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ActuatorCmd {
    /// Commanded velocity, the output of the safety velocity law.
    ///
    /// Units: meters/second
    pub tar_vel_ms: f64,

    /// Commanded steering angle.
    ///
    /// Units: degrees
    pub steer_angle_deg: f64,

    /// Fused distance to the vehicle ahead.
    ///
    /// Units: meters
    pub cur_dist_m: f64,

    /// Target inter-vehicle distance.
    ///
    /// Units: meters
    pub tar_dist_m: f64,

    /// Encoder failure flag
    pub fi_encoder: bool,

    /// Camera failure flag
    pub fi_camera: bool,

    /// Lidar failure flag
    pub fi_lidar: bool,

    /// Camera-degraded latch
    pub beta: bool,

    /// Lidar-error latch
    pub gamma: bool,
}

/// One-shot flag requesting the heavy obstacle classifier be started.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectorFlag {
    pub run_detector: bool,
}

/// An error code reported by the lidar hardware.
#[derive(Debug, Serialize, Deserialize, Copy, Clone)]
pub struct LidarError {
    pub code: u32,
}

impl Default for CcMode {
    fn default() -> Self {
        CcMode::Target
    }
}
