//! Parameters structure for SafetyCtrl

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the safety controller.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    // ---- VELOCITIES ----
    /// Default target velocity.
    ///
    /// Units: meters/second
    pub target_vel_ms: f64,

    /// Velocity held at the inner edge of the safety zone.
    ///
    /// Units: meters/second
    pub safety_vel_ms: f64,

    /// Ceiling applied to the target velocity in remote command mode.
    ///
    /// Units: meters/second
    pub rcm_vel_ms: f64,

    // ---- DISTANCES ----
    /// Distance at which the leader commands an emergency brake.
    ///
    /// Units: meters
    pub lv_stop_dist_m: f64,

    /// Distance at which a follower commands an emergency brake.
    ///
    /// Units: meters
    pub fv_stop_dist_m: f64,

    /// Outer edge of the leader's velocity-blend zone.
    ///
    /// Units: meters
    pub safety_dist_m: f64,

    /// Default target inter-vehicle distance.
    ///
    /// Units: meters
    pub target_dist_m: f64,

    /// Floor applied to the target distance in remote command mode.
    ///
    /// Units: meters
    pub rcm_dist_m: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            target_vel_ms: 0.5,
            safety_vel_ms: 0.3,
            rcm_vel_ms: 0.8,
            lv_stop_dist_m: 0.5,
            fv_stop_dist_m: 0.5,
            safety_dist_m: 1.5,
            target_dist_m: 0.8,
            rcm_dist_m: 0.8,
        }
    }
}
