//! Lane fusion module
//!
//! Turns the latest forward camera frame into a steering angle and lane
//! curve coefficients by way of the external lane estimation process, and
//! watches the frame stream for staleness. A camera that stops producing
//! new pixels while flagged as failed eventually latches the
//! camera-degraded mode, after which steering is taken from the negated
//! lidar-derived angle instead of the vision estimate.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod estimator;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
pub use estimator::*;
pub use state::*;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Seed value of the stall counter. This many consecutive unchanged frames
/// (while the camera failure flag is raised) latch the camera-degraded mode.
pub const STALL_COUNT_SEED: i32 = 10;

/// Target velocities at or below this value suspend the staleness check, so
/// a parked vehicle staring at a static scene is not declared degraded.
///
/// Units: meters/second
pub const MIN_ACTIVE_TARGET_VEL_MS: f64 = 0.001;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during LaneFusion operation.
#[derive(Debug, thiserror::Error)]
pub enum LaneFusionError {
    #[error("No lane estimator has been set, was init skipped?")]
    NotInitialised,

    #[error("Lane estimator error: {0}")]
    EstimatorError(LaneEstError),
}
