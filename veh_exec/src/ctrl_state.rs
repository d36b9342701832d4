//! # Shared Control State
//!
//! The control state is the single aggregate shared between the control
//! loop, the per-cycle fusion tasks, the sync server, and the sensor client.
//! Each logical group of fields sits behind its own lock so unrelated
//! updates never serialise against each other; fields that must change
//! together (distance and angle to the lead vehicle) live in the same group.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering},
    Mutex,
};

use comms_if::{ctrl::CcMode, sync::LaneCoefs};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Distance to the lead vehicle assumed before the first lidar reading.
///
/// Units: meters
pub const STARTUP_DISTANCE_M: f64 = 10.0;

/// Target inter-vehicle distance assumed before the first command.
///
/// Units: meters
pub const STARTUP_TARGET_DIST_M: f64 = 0.8;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A boolean flag which only ever transitions from clear to set.
///
/// Used for the failure and degraded-mode flags, which must stay raised for
/// the remainder of the run once raised.
#[derive(Debug, Default)]
pub struct Latch(AtomicBool);

/// Fused state of the vehicle ahead. Distance and angle are always written
/// together under the group lock, never separately.
#[derive(Debug, Clone, Copy)]
pub struct LeadState {
    /// Distance to the vehicle ahead.
    ///
    /// Units: meters
    pub distance_m: f64,

    /// Angle to the vehicle ahead.
    ///
    /// Units: degrees
    pub angle_deg: f64,

    /// Steering angle to be commanded this cycle.
    ///
    /// Units: degrees
    pub steer_angle_deg: f64,
}

/// Lane geometry state refreshed once per cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaneState {
    /// The fitted lane curves
    pub coef: LaneCoefs,

    /// Distance to the vehicle ahead estimated from lane geometry, zero if
    /// no estimate is available.
    ///
    /// Units: meters
    pub est_dist_m: f64,

    /// Region-of-interest row offset for the lane estimator.
    ///
    /// Units: pixels
    pub roi_offset_px: i32,
}

/// Commanded setpoints.
#[derive(Debug, Clone, Copy)]
pub struct Setpoints {
    /// Target velocity.
    ///
    /// Units: meters/second
    pub target_vel_ms: f64,

    /// Target inter-vehicle distance.
    ///
    /// Units: meters
    pub target_dist_m: f64,
}

/// Sticky failure flags, one per sensor.
#[derive(Debug, Default)]
pub struct FailureFlags {
    pub encoder: Latch,
    pub camera: Latch,
    pub lidar: Latch,
}

/// Operating mode flags.
#[derive(Debug)]
pub struct ModeFlags {
    /// Manual-vs-auto flag, mirrored from the actuator node
    pub alpha: AtomicBool,

    /// Camera-degraded latch, raised by the staleness detector
    pub beta: Latch,

    /// Lidar-error latch, raised by the external lidar error signal
    pub gamma: Latch,

    /// Local actuator node mode, mirrored for telemetry
    pub lrc_mode: AtomicU8,

    /// Control center mode, meaningful on the lead vehicle only
    pub cc_mode: Mutex<CcMode>,

    /// True if the control center asked this vehicle to stream its rear
    /// camera
    pub send_rear_image: AtomicBool,
}

/// The shared control state aggregate.
#[derive(Debug, Default)]
pub struct CtrlState {
    /// Fused lead-vehicle group
    pub lead: Mutex<LeadState>,

    /// Lane geometry group
    pub lane: Mutex<LaneState>,

    /// Commanded setpoints group
    pub setpoints: Mutex<Setpoints>,

    /// Current velocity from odometry
    pub cur_vel_ms: Mutex<f64>,

    /// Output of the safety velocity law. Only the safety-controller step of
    /// the control loop writes this, through `set_result_vel`.
    result_vel_ms: Mutex<f64>,

    /// Sticky failure flags
    pub failure: FailureFlags,

    /// Operating mode flags
    pub mode: ModeFlags,

    /// Last error code reported by the lidar hardware
    pub lidar_err_code: AtomicU32,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Latch {
    /// Raise the latch. There is no way to clear it again.
    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Return true if the latch has been raised.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for LeadState {
    fn default() -> Self {
        Self {
            distance_m: STARTUP_DISTANCE_M,
            angle_deg: 0.0,
            steer_angle_deg: 0.0,
        }
    }
}

impl Default for Setpoints {
    fn default() -> Self {
        Self {
            target_vel_ms: 0.0,
            target_dist_m: STARTUP_TARGET_DIST_M,
        }
    }
}

impl Default for ModeFlags {
    fn default() -> Self {
        Self {
            alpha: AtomicBool::new(false),
            beta: Latch::default(),
            gamma: Latch::default(),
            lrc_mode: AtomicU8::new(0),
            cc_mode: Mutex::new(CcMode::Target),
            send_rear_image: AtomicBool::new(false),
        }
    }
}

impl CtrlState {
    /// Write the fused distance and angle to the lead vehicle, together,
    /// under the group lock.
    pub fn set_lead(&self, distance_m: f64, angle_deg: f64) {
        let mut lead = self.lead.lock().expect("CtrlState: lead mutex poisoned");
        lead.distance_m = distance_m;
        lead.angle_deg = angle_deg;
    }

    /// Write the steering angle to be commanded this cycle.
    pub fn set_steer_angle(&self, steer_angle_deg: f64) {
        let mut lead = self.lead.lock().expect("CtrlState: lead mutex poisoned");
        lead.steer_angle_deg = steer_angle_deg;
    }

    /// Snapshot the lead-vehicle group.
    pub fn lead(&self) -> LeadState {
        *self.lead.lock().expect("CtrlState: lead mutex poisoned")
    }

    /// Snapshot the lane group.
    pub fn lane(&self) -> LaneState {
        *self.lane.lock().expect("CtrlState: lane mutex poisoned")
    }

    /// Snapshot the setpoints group.
    pub fn setpoints(&self) -> Setpoints {
        *self
            .setpoints
            .lock()
            .expect("CtrlState: setpoints mutex poisoned")
    }

    /// Replace both setpoints under the group lock.
    pub fn set_setpoints(&self, target_vel_ms: f64, target_dist_m: f64) {
        let mut sp = self
            .setpoints
            .lock()
            .expect("CtrlState: setpoints mutex poisoned");
        sp.target_vel_ms = target_vel_ms;
        sp.target_dist_m = target_dist_m;
    }

    /// Replace the target velocity only.
    pub fn set_target_vel(&self, target_vel_ms: f64) {
        let mut sp = self
            .setpoints
            .lock()
            .expect("CtrlState: setpoints mutex poisoned");
        sp.target_vel_ms = target_vel_ms;
    }

    /// Current velocity from odometry.
    pub fn cur_vel(&self) -> f64 {
        *self
            .cur_vel_ms
            .lock()
            .expect("CtrlState: cur_vel mutex poisoned")
    }

    /// Store the current velocity from odometry.
    pub fn set_cur_vel(&self, cur_vel_ms: f64) {
        *self
            .cur_vel_ms
            .lock()
            .expect("CtrlState: cur_vel mutex poisoned") = cur_vel_ms;
    }

    /// Output of the safety velocity law.
    pub fn result_vel(&self) -> f64 {
        *self
            .result_vel_ms
            .lock()
            .expect("CtrlState: result_vel mutex poisoned")
    }

    /// Store the output of the safety velocity law. Only the
    /// safety-controller step of the control loop may call this.
    pub fn set_result_vel(&self, result_vel_ms: f64) {
        *self
            .result_vel_ms
            .lock()
            .expect("CtrlState: result_vel mutex poisoned") = result_vel_ms;
    }

    /// The current control center mode.
    pub fn cc_mode(&self) -> CcMode {
        *self
            .mode
            .cc_mode
            .lock()
            .expect("CtrlState: cc_mode mutex poisoned")
    }

    /// Store the control center mode.
    pub fn set_cc_mode(&self, mode: CcMode) {
        *self
            .mode
            .cc_mode
            .lock()
            .expect("CtrlState: cc_mode mutex poisoned") = mode;
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_latch_is_monotonic() {
        let latch = Latch::default();
        assert!(!latch.is_set());

        latch.set();
        assert!(latch.is_set());

        // Setting again never clears it
        latch.set();
        assert!(latch.is_set());
    }

    #[test]
    fn test_lead_written_together() {
        let state = CtrlState::default();

        let lead = state.lead();
        assert_eq!(lead.distance_m, STARTUP_DISTANCE_M);
        assert_eq!(lead.angle_deg, 0.0);

        state.set_lead(0.9, -2.5);
        let lead = state.lead();
        assert_eq!(lead.distance_m, 0.9);
        assert_eq!(lead.angle_deg, -2.5);
    }

    #[test]
    fn test_result_vel_default_zero() {
        let state = CtrlState::default();
        assert_eq!(state.result_vel(), 0.0);

        state.set_result_vel(0.38);
        assert_eq!(state.result_vel(), 0.38);
    }
}
