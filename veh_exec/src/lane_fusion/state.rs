//! Implementations for the LaneFusion state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use comms_if::{
    lane::LaneRequest,
    sensor::{BoundingBox, SensorFrame},
};
use serde::Serialize;
use std::sync::{atomic::AtomicBool, Arc};

// Internal
use super::{LaneEstimator, LaneFusionError, MIN_ACTIVE_TARGET_VEL_MS, STALL_COUNT_SEED};
use crate::ctrl_state::CtrlState;
use crate::rendezvous::RoiRendezvous;
use util::{module::State, session::Session};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Lane fusion module state
pub struct LaneFusion {
    estimator: Option<Box<dyn LaneEstimator>>,

    /// The frame processed on the previous cycle, compared against the
    /// current frame by the staleness check
    prev_frame: Option<SensorFrame>,

    /// Remaining consecutive unchanged frames before the camera-degraded
    /// mode latches. Stays at zero once it reaches zero.
    stall_count: i32,
}

/// Input data to lane fusion for one cycle.
pub struct InputData {
    /// Snapshot of the forward frame, `None` if the camera has not published
    /// yet
    pub frame: Option<SensorFrame>,

    /// Current vehicle velocity from odometry.
    ///
    /// Units: meters/second
    pub cur_vel_ms: f64,

    /// Commanded target velocity, gating the staleness check.
    ///
    /// Units: meters/second
    pub target_vel_ms: f64,

    /// Snapshot of the detector bounding box
    pub bbox: BoundingBox,

    /// The shared control state
    pub state: Arc<CtrlState>,

    /// The per-cycle rendezvous, waited on until object fusion has stored
    /// the region-of-interest offset
    pub rdv: Arc<RoiRendezvous>,

    /// The global run flag, bounding the rendezvous wait on shutdown
    pub run: Arc<AtomicBool>,
}

/// Output of lane fusion for one cycle.
#[derive(Clone, Copy, Default, Serialize, Debug)]
pub struct OutputData {
    /// The steering angle published this cycle.
    ///
    /// Units: degrees
    pub steer_angle_deg: f64,

    /// Lane-estimated distance to the vehicle ahead, zero if unavailable.
    ///
    /// Units: meters
    pub est_dist_m: f64,
}

/// Status report for LaneFusion processing.
#[derive(Clone, Copy, Default, Serialize, Debug)]
pub struct StatusReport {
    /// The stall counter after this cycle's staleness check
    pub stall_count: i32,

    /// True if the camera-degraded latch is driving the steering override
    pub steer_overridden: bool,

    /// True if the estimator was not consulted this cycle
    pub estimator_skipped: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for LaneFusion {
    fn default() -> Self {
        Self {
            estimator: None,
            prev_frame: None,
            stall_count: STALL_COUNT_SEED,
        }
    }
}

impl State for LaneFusion {
    type InitData = Box<dyn LaneEstimator>;
    type InitError = LaneFusionError;

    type InputData = InputData;
    type OutputData = OutputData;
    type StatusReport = StatusReport;
    type ProcError = LaneFusionError;

    /// Initialise the LaneFusion module.
    ///
    /// Expected init data is the lane estimator to fuse through.
    fn init(&mut self, init_data: Self::InitData, _session: &Session) -> Result<(), Self::InitError> {
        self.estimator = Some(init_data);

        Ok(())
    }

    /// Run the staleness check and the lane estimate for this cycle.
    fn proc(
        &mut self,
        input: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        // ---- STALENESS CHECK ----

        // Compare against the previous frame only while the counter is live
        // and the vehicle is actually commanded to move
        if let (Some(frame), Some(prev)) = (&input.frame, &self.prev_frame) {
            if self.stall_count != 0 && input.target_vel_ms > MIN_ACTIVE_TARGET_VEL_MS {
                let changed = changed_byte_count(frame, prev);

                if changed == 0 && input.state.failure.camera.is_set() {
                    self.stall_count -= 1;
                } else {
                    self.stall_count = STALL_COUNT_SEED;
                }
            }
        }

        self.prev_frame = input.frame.clone();

        // ---- RENDEZVOUS ----

        // The estimator must not run until object fusion has stored the
        // region-of-interest offset. Abandoned only on shutdown.
        if !input.rdv.wait(&input.run) {
            return Ok((
                OutputData::default(),
                StatusReport {
                    stall_count: self.stall_count,
                    steer_overridden: false,
                    estimator_skipped: true,
                },
            ));
        }

        let roi_offset_px = input.state.lane().roi_offset_px;

        // ---- LANE ESTIMATE ----

        let mut response = None;

        if let Some(ref frame) = input.frame {
            let estimator = self
                .estimator
                .as_mut()
                .ok_or(LaneFusionError::NotInitialised)?;

            let r = estimator
                .estimate(&LaneRequest {
                    frame: frame.clone(),
                    cur_vel_ms: input.cur_vel_ms,
                    bbox: input.bbox.clone(),
                    roi_offset_px,
                })
                .map_err(LaneFusionError::EstimatorError)?;

            // Lane curves and estimated distance go to the lane group
            {
                let mut lane = input
                    .state
                    .lane
                    .lock()
                    .expect("CtrlState: lane mutex poisoned");
                lane.coef = r.coef;
                lane.est_dist_m = r.est_dist_m;
            }

            response = Some(r);
        }

        // ---- STEERING ----

        let steer_overridden = self.stall_count == 0;

        let steer_angle_deg = if steer_overridden {
            // The camera has gone stale: latch the degraded mode and steer
            // by the negated lidar-derived angle from here on
            input.state.mode.beta.set();

            let mut lead = input
                .state
                .lead
                .lock()
                .expect("CtrlState: lead mutex poisoned");
            lead.steer_angle_deg = -lead.angle_deg;
            lead.steer_angle_deg
        } else {
            match response {
                Some(ref r) => {
                    input.state.set_steer_angle(r.steer_angle_deg);
                    r.steer_angle_deg
                }
                // No frame this cycle: hold the previous steering angle
                None => input.state.lead().steer_angle_deg,
            }
        };

        Ok((
            OutputData {
                steer_angle_deg,
                est_dist_m: response.as_ref().map(|r| r.est_dist_m).unwrap_or(0.0),
            },
            StatusReport {
                stall_count: self.stall_count,
                steer_overridden,
                estimator_skipped: response.is_none(),
            },
        ))
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Count the bytes which differ between two frames.
///
/// Frames of different geometry always count as fully changed.
fn changed_byte_count(a: &SensorFrame, b: &SensorFrame) -> usize {
    if a.width != b.width || a.height != b.height || a.data.len() != b.data.len() {
        return a.data.len().max(b.data.len());
    }

    a.data
        .iter()
        .zip(b.data.iter())
        .filter(|(x, y)| (**x ^ **y) != 0)
        .count()
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::lane_fusion::LaneEstError;
    use chrono::Utc;
    use comms_if::lane::LaneResponse;
    use comms_if::sync::{CurveCoef, LaneCoefs};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// An estimator returning a canned response and counting its calls.
    struct FakeEstimator {
        response: LaneResponse,
        calls: Arc<AtomicUsize>,
    }

    impl LaneEstimator for FakeEstimator {
        fn estimate(&mut self, _request: &LaneRequest) -> Result<LaneResponse, LaneEstError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(self.response.clone())
        }
    }

    fn fusion_with_fake(steer_angle_deg: f64) -> (LaneFusion, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));

        let mut fusion = LaneFusion::default();
        fusion.estimator = Some(Box::new(FakeEstimator {
            response: LaneResponse {
                steer_angle_deg,
                coef: LaneCoefs {
                    center: CurveCoef {
                        a: 0.001,
                        b: -0.1,
                        c: 320.0,
                    },
                    ..Default::default()
                },
                est_dist_m: 0.6,
            },
            calls: calls.clone(),
        }));

        (fusion, calls)
    }

    fn frame(fill: u8) -> SensorFrame {
        SensorFrame {
            timestamp: Utc::now(),
            width: 4,
            height: 4,
            data: vec![fill; 48],
        }
    }

    fn input(state: &Arc<CtrlState>, fill: u8) -> InputData {
        // The rendezvous is pre-signalled so proc never blocks in tests
        let rdv = Arc::new(RoiRendezvous::default());
        rdv.arm();
        rdv.signal();

        InputData {
            frame: Some(frame(fill)),
            cur_vel_ms: 0.4,
            target_vel_ms: 0.5,
            bbox: BoundingBox::default(),
            state: state.clone(),
            rdv,
            run: Arc::new(AtomicBool::new(true)),
        }
    }

    #[test]
    fn test_nominal_cycle_updates_lane_and_steering() {
        let state = Arc::new(CtrlState::default());
        let (mut fusion, calls) = fusion_with_fake(4.5);

        let (output, report) = fusion.proc(&input(&state, 1)).unwrap();

        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert!(!report.steer_overridden);
        assert!((output.steer_angle_deg - 4.5).abs() < 1e-9);
        assert!((output.est_dist_m - 0.6).abs() < 1e-9);

        assert!((state.lead().steer_angle_deg - 4.5).abs() < 1e-9);
        assert!((state.lane().est_dist_m - 0.6).abs() < 1e-9);
        assert!((state.lane().coef.center.c - 320.0).abs() < 1e-9);
    }

    #[test]
    fn test_ten_stale_frames_latch_camera_degraded() {
        let state = Arc::new(CtrlState::default());
        state.failure.camera.set();
        state.set_lead(0.8, 2.5);

        let (mut fusion, _) = fusion_with_fake(4.5);

        // First cycle seeds the previous frame, then ten unchanged frames
        // drain the counter
        let mut report = StatusReport::default();
        for _ in 0..11 {
            let (_, r) = fusion.proc(&input(&state, 1)).unwrap();
            report = r;
        }

        assert_eq!(report.stall_count, 0);
        assert!(report.steer_overridden);
        assert!(state.mode.beta.is_set());

        // Steering is the negated lidar-derived angle, not the estimate
        assert!((state.lead().steer_angle_deg + 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_changed_frame_resets_stall_counter() {
        let state = Arc::new(CtrlState::default());
        state.failure.camera.set();

        let (mut fusion, _) = fusion_with_fake(4.5);

        // Seed, then drain the counter halfway
        for _ in 0..6 {
            fusion.proc(&input(&state, 1)).unwrap();
        }

        // A single changed frame restores the full count
        let (_, report) = fusion.proc(&input(&state, 2)).unwrap();
        assert_eq!(report.stall_count, STALL_COUNT_SEED);
        assert!(!state.mode.beta.is_set());
    }

    #[test]
    fn test_no_stall_without_camera_failure_flag() {
        let state = Arc::new(CtrlState::default());

        let (mut fusion, _) = fusion_with_fake(4.5);

        let mut report = StatusReport::default();
        for _ in 0..20 {
            let (_, r) = fusion.proc(&input(&state, 1)).unwrap();
            report = r;
        }

        assert_eq!(report.stall_count, STALL_COUNT_SEED);
        assert!(!state.mode.beta.is_set());
    }

    #[test]
    fn test_stall_check_suspended_when_parked() {
        let state = Arc::new(CtrlState::default());
        state.failure.camera.set();

        let (mut fusion, _) = fusion_with_fake(4.5);

        for _ in 0..20 {
            let mut i = input(&state, 1);
            i.target_vel_ms = 0.0;
            fusion.proc(&i).unwrap();
        }

        assert!(!state.mode.beta.is_set());
    }

    #[test]
    fn test_missing_frame_holds_previous_steering() {
        let state = Arc::new(CtrlState::default());
        let (mut fusion, calls) = fusion_with_fake(4.5);

        // One nominal cycle establishes a steering angle
        fusion.proc(&input(&state, 1)).unwrap();

        // A cycle without a frame skips the estimator and holds the angle
        let mut i = input(&state, 1);
        i.frame = None;
        let (output, report) = fusion.proc(&i).unwrap();

        assert!(report.estimator_skipped);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert!((output.steer_angle_deg - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_rendezvous_abandoned_on_shutdown() {
        let state = Arc::new(CtrlState::default());
        let (mut fusion, calls) = fusion_with_fake(4.5);

        let rdv = Arc::new(RoiRendezvous::default());
        rdv.arm();

        let i = InputData {
            frame: Some(frame(1)),
            cur_vel_ms: 0.4,
            target_vel_ms: 0.5,
            bbox: BoundingBox::default(),
            state: state.clone(),
            rdv,
            run: Arc::new(AtomicBool::new(false)),
        };

        let (_, report) = fusion.proc(&i).unwrap();
        assert!(report.estimator_skipped);
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }
}
