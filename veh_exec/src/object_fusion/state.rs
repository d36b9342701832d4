//! Implementations for the ObjectFusion state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use comms_if::sensor::ObstacleList;
use serde::Serialize;
use std::sync::Arc;

// Internal
use super::{ObjectFusionError, Params};
use crate::ctrl_state::{CtrlState, STARTUP_DISTANCE_M};
use crate::rendezvous::RoiRendezvous;
use util::{module::State, params, session::Session};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Object fusion module state
#[derive(Default)]
pub struct ObjectFusion {
    pub(crate) params: Params,

    /// Pure-pursuit correction angle for the nearest obstacle, carried over
    /// from the last cycle in which an obstacle was seen.
    ///
    /// Units: degrees
    pp_angle_deg: f64,
}

/// Input data to object fusion for one cycle.
pub struct InputData {
    /// Snapshot of the obstacle list, `None` if the lidar has not published
    /// yet
    pub obstacles: Option<ObstacleList>,

    /// The shared control state
    pub state: Arc<CtrlState>,

    /// The per-cycle rendezvous, signalled once the region-of-interest
    /// offset has been stored
    pub rdv: Arc<RoiRendezvous>,
}

/// Output of object fusion for one cycle.
#[derive(Clone, Copy, Default, Serialize, Debug)]
pub struct OutputData {
    /// Fused distance to the lead vehicle.
    ///
    /// Units: meters
    pub distance_m: f64,

    /// Fused angle to the lead vehicle.
    ///
    /// Units: degrees
    pub angle_deg: f64,

    /// Region-of-interest row offset handed to lane fusion.
    ///
    /// Units: pixels
    pub roi_offset_px: i32,
}

/// Status report for ObjectFusion processing.
#[derive(Clone, Copy, Default, Serialize, Debug)]
pub struct StatusReport {
    /// Number of circles in this cycle's obstacle list
    pub circle_count: usize,

    /// True if the lane-estimated distance overrode the lidar measurement
    pub lane_dist_override: bool,

    /// True if the pure-pursuit angle was paired with the distance
    pub pp_angle_selected: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ObjectFusion {
    /// Build an object fusion module directly from a parameter set.
    pub fn from_params(params: Params) -> Self {
        Self {
            params,
            pp_angle_deg: 0.0,
        }
    }
}

impl State for ObjectFusion {
    type InitData = &'static str;
    type InitError = params::LoadError;

    type InputData = InputData;
    type OutputData = OutputData;
    type StatusReport = StatusReport;
    type ProcError = ObjectFusionError;

    /// Initialise the ObjectFusion module.
    ///
    /// Expected init data is the path to the parameter file
    fn init(&mut self, init_data: Self::InitData, _session: &Session) -> Result<(), Self::InitError> {
        self.params = params::load(init_data)?;

        Ok(())
    }

    /// Fuse the obstacle list into the lead-vehicle state for this cycle.
    ///
    /// The rendezvous is always signalled before returning, so lane fusion
    /// can never be left waiting by an empty obstacle list.
    fn proc(
        &mut self,
        input: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        let lw = self.params.wheelbase_m;

        let mut min_dist_m = STARTUP_DISTANCE_M;
        let mut raw_angle_deg = 0.0;
        let mut circle_count = 0;

        if let Some(ref obstacles) = input.obstacles {
            circle_count = obstacles.circles.len();

            for circle in &obstacles.circles {
                let x = circle.center_x_m;
                let y = circle.center_y_m + self.params.lateral_offset_m;

                let dist_m = -x - circle.radius_m;
                let angle_deg = (y / x).atan().to_degrees();

                if dist_m <= min_dist_m {
                    min_dist_m = dist_m;
                    raw_angle_deg = angle_deg;

                    // Pure-pursuit correction towards the winning circle
                    let ld = ((x - lw).powi(2) + y.powi(2)).sqrt();
                    let angle_a = (y / (x - lw)).atan();
                    self.pp_angle_deg = (2.0 * lw * angle_a.sin() / ld).atan().to_degrees();
                }
            }
        }

        // In the lidar-degraded state a non-zero lane-estimated distance
        // takes precedence over the lidar measurement
        let mut lane_dist_override = false;
        let est_dist_m = input.state.lane().est_dist_m;
        if input.state.mode.gamma.is_set() && est_dist_m != 0.0 {
            min_dist_m = est_dist_m;
            lane_dist_override = true;
        }

        // Pair the distance with the pure-pursuit angle when the camera is
        // degraded, the raw angle otherwise
        let pp_angle_selected = input.state.mode.beta.is_set();
        let angle_deg = if pp_angle_selected {
            self.pp_angle_deg
        } else {
            raw_angle_deg
        };

        // Distance and angle go to the lead group together, and only when at
        // least one circle was seen this cycle
        if circle_count != 0 {
            input.state.set_lead(min_dist_m, angle_deg);
        }

        // Derive the region-of-interest offset and release lane fusion
        let roi_offset_px = if min_dist_m > self.params.roi_near_m
            && min_dist_m < self.params.roi_far_m
        {
            ((self.params.roi_far_m - min_dist_m) * self.params.roi_scale_px_per_m) as i32
        } else {
            0
        };

        input
            .state
            .lane
            .lock()
            .expect("CtrlState: lane mutex poisoned")
            .roi_offset_px = roi_offset_px;

        input.rdv.signal();

        Ok((
            OutputData {
                distance_m: min_dist_m,
                angle_deg,
                roi_offset_px,
            },
            StatusReport {
                circle_count,
                lane_dist_override,
                pp_angle_selected,
            },
        ))
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::sensor::Circle;
    use std::sync::atomic::AtomicBool;

    fn input(circles: Vec<Circle>) -> InputData {
        InputData {
            obstacles: Some(ObstacleList { circles }),
            state: Arc::new(CtrlState::default()),
            rdv: Arc::new(RoiRendezvous::default()),
        }
    }

    fn proc(fusion: &mut ObjectFusion, input: &InputData) -> (OutputData, StatusReport) {
        input.rdv.arm();
        fusion.proc(input).unwrap()
    }

    #[test]
    fn test_distance_and_angle_from_circle() {
        let mut fusion = ObjectFusion::default();

        // One circle dead ahead: y cancels the calibration offset
        let input = input(vec![Circle {
            center_x_m: -1.0,
            center_y_m: -0.03,
            radius_m: 0.2,
        }]);

        let (output, report) = proc(&mut fusion, &input);

        assert!((output.distance_m - 0.8).abs() < 1e-9);
        assert!(output.angle_deg.abs() < 1e-9);
        assert_eq!(report.circle_count, 1);

        // Written to the lead group as a pair
        let lead = input.state.lead();
        assert!((lead.distance_m - 0.8).abs() < 1e-9);
        assert!(lead.angle_deg.abs() < 1e-9);
    }

    #[test]
    fn test_nearest_circle_wins() {
        let mut fusion = ObjectFusion::default();

        let input = input(vec![
            Circle {
                center_x_m: -2.0,
                center_y_m: -0.03,
                radius_m: 0.2,
            },
            Circle {
                center_x_m: -1.0,
                center_y_m: -0.03,
                radius_m: 0.2,
            },
        ]);

        let (output, _) = proc(&mut fusion, &input);
        assert!((output.distance_m - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_pure_pursuit_angle_selected_when_camera_degraded() {
        let mut fusion = ObjectFusion::from_params(Params::default());
        let lw = 0.40;

        let circle = Circle {
            center_x_m: -1.0,
            center_y_m: 0.07,
            radius_m: 0.2,
        };

        // Nominal: the raw atan angle is paired with the distance
        let nominal = input(vec![circle]);
        let (output, report) = proc(&mut fusion, &nominal);
        assert!(!report.pp_angle_selected);
        let raw_expected = (0.1f64 / -1.0).atan().to_degrees();
        assert!((output.angle_deg - raw_expected).abs() < 1e-9);

        // Camera degraded: the pure-pursuit correction is paired instead
        let degraded = input(vec![circle]);
        degraded.state.mode.beta.set();
        let (output, report) = proc(&mut fusion, &degraded);
        assert!(report.pp_angle_selected);

        let (x, y) = (-1.0f64, 0.1f64);
        let ld = ((x - lw).powi(2) + y.powi(2)).sqrt();
        let angle_a = (y / (x - lw)).atan();
        let pp_expected = (2.0 * lw * angle_a.sin() / ld).atan().to_degrees();
        assert!((output.angle_deg - pp_expected).abs() < 1e-9);
        assert!((output.angle_deg - raw_expected).abs() > 1e-3);
    }

    #[test]
    fn test_lane_estimate_overrides_in_lidar_degraded_state() {
        let mut fusion = ObjectFusion::default();

        let input = input(vec![Circle {
            center_x_m: -1.0,
            center_y_m: -0.03,
            radius_m: 0.2,
        }]);
        input.state.mode.gamma.set();
        input
            .state
            .lane
            .lock()
            .unwrap()
            .est_dist_m = 0.7;

        let (output, report) = proc(&mut fusion, &input);
        assert!(report.lane_dist_override);
        assert!((output.distance_m - 0.7).abs() < 1e-9);
        assert!((input.state.lead().distance_m - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_roi_offset_window() {
        let mut fusion = ObjectFusion::default();

        // Inside the window: (1.24 - 1.0) * 490 = 117.6 -> 117
        let inside = input(vec![Circle {
            center_x_m: -1.2,
            center_y_m: -0.03,
            radius_m: 0.2,
        }]);
        let (output, _) = proc(&mut fusion, &inside);
        assert_eq!(output.roi_offset_px, 117);
        assert_eq!(inside.state.lane().roi_offset_px, 117);

        // Beyond the window the offset is zero
        let far = input(vec![Circle {
            center_x_m: -2.0,
            center_y_m: -0.03,
            radius_m: 0.2,
        }]);
        let (output, _) = proc(&mut fusion, &far);
        assert_eq!(output.roi_offset_px, 0);

        // Closer than the window the offset is also zero
        let near = input(vec![Circle {
            center_x_m: -0.3,
            center_y_m: -0.03,
            radius_m: 0.05,
        }]);
        let (output, _) = proc(&mut fusion, &near);
        assert_eq!(output.roi_offset_px, 0);
    }

    #[test]
    fn test_empty_list_leaves_lead_untouched_but_signals() {
        let mut fusion = ObjectFusion::default();

        let input = input(vec![]);
        let (_, report) = proc(&mut fusion, &input);

        assert_eq!(report.circle_count, 0);
        assert_eq!(input.state.lead().distance_m, STARTUP_DISTANCE_M);

        // The rendezvous fired even with nothing to fuse
        let run = AtomicBool::new(true);
        assert!(input.rdv.wait(&run));
    }
}
