//! Implementations for the SafetyCtrl state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use comms_if::node::VehicleRole;
use serde::Serialize;

// Internal
use super::{Params, SafetyCtrlError, FV_VEL_CUTOFF_MS};
use util::{maths::lin_map, module::State, params, session::Session};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Safety controller module state
#[derive(Default)]
pub struct SafetyCtrl {
    pub(crate) params: Params,

    law: Option<VelocityLaw>,
}

/// Input data to the safety controller.
#[derive(Clone, Copy, Default)]
pub struct InputData {
    /// Fused distance to the vehicle ahead.
    ///
    /// Units: meters
    pub distance_m: f64,

    /// Commanded target velocity.
    ///
    /// Units: meters/second
    pub target_vel_ms: f64,

    /// The output velocity from the previous cycle, the anchor of the
    /// leader's blend.
    ///
    /// Units: meters/second
    pub prev_result_vel_ms: f64,
}

/// Output velocity command.
#[derive(Clone, Copy, Default, Serialize, Debug)]
pub struct OutputData {
    /// The bounded output velocity.
    ///
    /// Units: meters/second
    pub result_vel_ms: f64,
}

/// Status report for SafetyCtrl processing.
#[derive(Clone, Copy, Default, Serialize, Debug)]
pub struct StatusReport {
    /// True if the emergency brake fired this cycle
    pub braking: bool,

    /// True if the output was produced by the safety-zone blend
    pub blending: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The velocity law, one variant per role class, selected once at
/// initialisation and never rechecked.
#[derive(Debug, Clone, Copy)]
enum VelocityLaw {
    /// The leader decides its own stopping policy from static obstacles and
    /// needs a smooth deceleration profile.
    Leader {
        stop_dist_m: f64,
        safety_dist_m: f64,
        safety_vel_ms: f64,
    },

    /// Followers inherit their setpoint from upstream and only need a hard
    /// cutoff for their own immediate margin.
    Follower { stop_dist_m: f64 },
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SafetyCtrl {
    /// The active parameter set, shared with the sync exchange for the
    /// remote-mode bounds.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Build a safety controller directly from a parameter set, selecting
    /// the velocity law for the given role.
    pub fn from_params(role: VehicleRole, params: Params) -> Self {
        let law = match role {
            VehicleRole::Lv => VelocityLaw::Leader {
                stop_dist_m: params.lv_stop_dist_m,
                safety_dist_m: params.safety_dist_m,
                safety_vel_ms: params.safety_vel_ms,
            },
            VehicleRole::Fv1 | VehicleRole::Fv2 => VelocityLaw::Follower {
                stop_dist_m: params.fv_stop_dist_m,
            },
        };

        Self {
            params,
            law: Some(law),
        }
    }
}

impl State for SafetyCtrl {
    type InitData = (VehicleRole, &'static str);
    type InitError = params::LoadError;

    type InputData = InputData;
    type OutputData = OutputData;
    type StatusReport = StatusReport;
    type ProcError = SafetyCtrlError;

    /// Initialise the SafetyCtrl module.
    ///
    /// Expected init data is the vehicle role and the path to the parameter
    /// file.
    fn init(
        &mut self,
        (role, param_path): Self::InitData,
        _session: &Session,
    ) -> Result<(), Self::InitError> {
        let params: Params = params::load(param_path)?;

        *self = Self::from_params(role, params);

        Ok(())
    }

    /// Evaluate the velocity law for this cycle.
    fn proc(
        &mut self,
        input: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        let law = self.law.ok_or(SafetyCtrlError::NotInitialised)?;

        let mut report = StatusReport::default();

        let result_vel_ms = match law {
            VelocityLaw::Leader {
                stop_dist_m,
                safety_dist_m,
                safety_vel_ms,
            } => {
                if input.distance_m <= stop_dist_m {
                    // Emergency brake
                    report.braking = true;
                    0.0
                } else if input.distance_m <= safety_dist_m {
                    // Blend down from the previous output towards the safety
                    // velocity as the gap closes, never exceeding the target
                    report.blending = true;
                    let blend = lin_map(
                        (stop_dist_m, safety_dist_m),
                        (safety_vel_ms, input.prev_result_vel_ms),
                        input.distance_m,
                    );
                    blend.min(input.target_vel_ms)
                } else {
                    input.target_vel_ms
                }
            }
            VelocityLaw::Follower { stop_dist_m } => {
                if input.distance_m <= stop_dist_m || input.target_vel_ms <= FV_VEL_CUTOFF_MS {
                    // Emergency brake
                    report.braking = true;
                    0.0
                } else {
                    input.target_vel_ms
                }
            }
        };

        Ok((OutputData { result_vel_ms }, report))
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn leader() -> SafetyCtrl {
        SafetyCtrl::from_params(VehicleRole::Lv, Params::default())
    }

    fn follower() -> SafetyCtrl {
        SafetyCtrl::from_params(VehicleRole::Fv1, Params::default())
    }

    fn proc_vel(ctrl: &mut SafetyCtrl, input: InputData) -> f64 {
        let (output, _) = ctrl.proc(&input).unwrap();
        output.result_vel_ms
    }

    #[test]
    fn test_leader_beyond_safety_zone() {
        // Distance 2.0 m with safety at 1.5 m: pass the target through
        let mut ctrl = leader();
        let vel = proc_vel(
            &mut ctrl,
            InputData {
                distance_m: 2.0,
                target_vel_ms: 0.5,
                prev_result_vel_ms: 0.5,
            },
        );
        assert!((vel - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_leader_blend_inside_safety_zone() {
        // 0.3 + (0.5 - 0.3) * ((0.9 - 0.5) / (1.5 - 0.5)) = 0.38
        let mut ctrl = leader();
        let vel = proc_vel(
            &mut ctrl,
            InputData {
                distance_m: 0.9,
                target_vel_ms: 0.5,
                prev_result_vel_ms: 0.5,
            },
        );
        assert!((vel - 0.38).abs() < 1e-9);
    }

    #[test]
    fn test_leader_blend_clamped_by_target() {
        let mut ctrl = leader();
        let vel = proc_vel(
            &mut ctrl,
            InputData {
                distance_m: 1.4,
                target_vel_ms: 0.2,
                prev_result_vel_ms: 0.5,
            },
        );
        assert!((vel - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_emergency_brake_at_stop_distance() {
        for ctrl in &mut [leader(), follower()] {
            for distance_m in &[0.5, 0.3, 0.0] {
                let vel = proc_vel(
                    ctrl,
                    InputData {
                        distance_m: *distance_m,
                        target_vel_ms: 0.5,
                        prev_result_vel_ms: 0.5,
                    },
                );
                assert_eq!(vel, 0.0);
            }
        }
    }

    #[test]
    fn test_follower_cutoff_on_low_target() {
        // At or below the cutoff a follower stops regardless of distance
        let mut ctrl = follower();
        for target_vel_ms in &[0.1, 0.05, 0.0] {
            let vel = proc_vel(
                &mut ctrl,
                InputData {
                    distance_m: 5.0,
                    target_vel_ms: *target_vel_ms,
                    prev_result_vel_ms: 0.5,
                },
            );
            assert_eq!(vel, 0.0);
        }
    }

    #[test]
    fn test_follower_emergency_stop_scenario() {
        // Commanded 0.4 m/s but the gap has closed to 0.3 m
        let mut ctrl = follower();
        let vel = proc_vel(
            &mut ctrl,
            InputData {
                distance_m: 0.3,
                target_vel_ms: 0.4,
                prev_result_vel_ms: 0.4,
            },
        );
        assert_eq!(vel, 0.0);
    }

    #[test]
    fn test_follower_passthrough() {
        let mut ctrl = follower();
        let vel = proc_vel(
            &mut ctrl,
            InputData {
                distance_m: 0.9,
                target_vel_ms: 0.4,
                prev_result_vel_ms: 0.0,
            },
        );
        assert!((vel - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_leader_blend_monotonic_and_continuous() {
        let mut ctrl = leader();

        // Sweep the blend zone: the output must never decrease as the gap
        // opens up
        let mut prev_vel = 0.0;
        let mut distance_m = 0.501;
        while distance_m < 1.5 {
            let vel = proc_vel(
                &mut ctrl,
                InputData {
                    distance_m,
                    target_vel_ms: 0.5,
                    prev_result_vel_ms: 0.5,
                },
            );
            assert!(vel >= prev_vel);
            prev_vel = vel;
            distance_m += 0.01;
        }

        // Approaching the inner boundary the blend settles at the safety
        // velocity
        let inner = proc_vel(
            &mut ctrl,
            InputData {
                distance_m: 0.5 + 1e-6,
                target_vel_ms: 0.5,
                prev_result_vel_ms: 0.5,
            },
        );
        assert!((inner - 0.3).abs() < 1e-3);

        // Approaching the outer boundary the blend meets the pass-through
        // region with no jump
        let outer = proc_vel(
            &mut ctrl,
            InputData {
                distance_m: 1.5 - 1e-6,
                target_vel_ms: 0.5,
                prev_result_vel_ms: 0.5,
            },
        );
        assert!((outer - 0.5).abs() < 1e-3);
    }
}
