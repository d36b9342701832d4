//! Main vehicle-side executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Initialise all modules and network clients
//!     - Background loops:
//!         - Sensor receive loop filling the latest-value caches
//!         - Sync exchange loop answering the control center
//!         - Image relay loops, started lazily when first needed
//!     - Main control loop, at a fixed cadence:
//!         - Lane fusion and object fusion run concurrently, with object
//!           fusion's region-of-interest result gating the lane estimate
//!         - Safety velocity law
//!         - Actuator command publication and run logging
//!
//! On shutdown the loop publishes one final stop command and joins every
//! background loop before exiting.

// ---------------------------------------------------------------------------
// USE MODULES FROM LIBRARY
// ---------------------------------------------------------------------------

use veh_lib::{
    actuator_server::ActuatorServer,
    ctrl_state::CtrlState,
    image_relay,
    lane_fusion::{self, LaneEstClient, LaneFusion},
    object_fusion::{self, ObjectFusion},
    params::VehExecParams,
    rendezvous::RoiRendezvous,
    safety_ctrl::{self, SafetyCtrl},
    sensor_client::{self, SensorClient},
    sensor_inbox::SensorInbox,
    sync_server::{self, SyncServer},
};

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use comms_if::ctrl::ActuatorCmd;
use log::{info, trace, warn};
use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// Internal
use util::{
    archive::Archiver,
    logger::{logger_init, LevelFilter},
    module::State,
    session::{self, Session},
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Target period of one control cycle.
const CYCLE_PERIOD_S: f64 = 0.05;

/// Sleep between polls while waiting for the first camera frame.
const FIRST_FRAME_WAIT_S: u64 = 2;

/// Number of cycles after which the mean cycle time accumulator resets.
const CYCLE_TIME_RESET_CYCLES: u64 = 3000;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One row of the distance run log.
#[derive(Serialize)]
struct DistRecord {
    time_s: f64,
    measured_dist_m: f64,
    estimated_dist_m: f64,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("veh_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Trace, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Platoon Vehicle Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let exec_params: VehExecParams =
        util::params::load("veh_exec.toml").wrap_err("Could not load exec params")?;

    let role = exec_params.role;

    info!("Exec parameters loaded, running as {}\n", role);

    // ---- SHUTDOWN HOOK ----

    // The run flag is the single cancellation signal: every loop checks it
    // at the top of each iteration and finishes its current iteration
    // before exiting.
    let run = Arc::new(AtomicBool::new(true));

    {
        let run = run.clone();
        ctrlc::set_handler(move || {
            run.store(false, Ordering::Relaxed);
        })
        .wrap_err("Failed to install the shutdown handler")?;
    }

    // ---- INITIALISE SHARED STATE ----

    let state = Arc::new(CtrlState::default());
    let inbox = Arc::new(SensorInbox::default());
    let rdv = Arc::new(RoiRendezvous::default());

    // ---- INITIALISE NETWORK ----

    info!("Initialising network");

    let zmq_ctx = comms_if::net::zmq::Context::new();

    let sensor_client = SensorClient::new(&zmq_ctx, &exec_params)
        .wrap_err("Failed to initialise the SensorClient")?;
    info!("SensorClient initialised");

    let sync_server =
        SyncServer::new(&zmq_ctx, &exec_params).wrap_err("Failed to initialise the SyncServer")?;
    info!("SyncServer initialised");

    let mut actuator_server = ActuatorServer::new(&zmq_ctx, &exec_params)
        .wrap_err("Failed to initialise the ActuatorServer")?;
    info!("ActuatorServer initialised");

    let lane_est_client = LaneEstClient::new(&zmq_ctx, &exec_params)
        .wrap_err("Failed to initialise the LaneEstClient")?;
    info!("LaneEstClient initialised");

    info!("Network initialisation complete");

    // ---- INITIALISE MODULES ----

    info!("Initialising modules...");

    let mut lane_fusion = LaneFusion::default();
    lane_fusion
        .init(Box::new(lane_est_client), &session)
        .wrap_err("Failed to initialise LaneFusion")?;
    info!("LaneFusion init complete");

    let mut object_fusion = ObjectFusion::default();
    object_fusion
        .init("object_fusion.toml", &session)
        .wrap_err("Failed to initialise ObjectFusion")?;
    info!("ObjectFusion init complete");

    let mut safety_ctrl = SafetyCtrl::default();
    safety_ctrl
        .init((role, "safety_ctrl.toml"), &session)
        .wrap_err("Failed to initialise SafetyCtrl")?;
    info!("SafetyCtrl init complete");

    info!("Module initialisation complete\n");

    // ---- START BACKGROUND LOOPS ----

    let sensor_jh = {
        let inbox = inbox.clone();
        let state = state.clone();
        let run = run.clone();
        thread::spawn(move || sensor_client::run(sensor_client, role, inbox, state, run))
    };

    let sync_jh = {
        let state = state.clone();
        let run = run.clone();
        let safety_params = safety_ctrl.params().clone();
        thread::spawn(move || sync_server::run(sync_server, role, state, safety_params, run))
    };

    // ---- RUN LOGS ----

    let mut dist_archiver =
        Archiver::from_numbered(&session, "dist_log").wrap_err("Could not open the distance log")?;

    // ---- STARTUP ----

    // Block until the first forward frame arrives; a missing camera is a
    // waiting condition, not a failure
    while !inbox.frame_seen() && run.load(Ordering::Relaxed) {
        info!("Waiting for the first camera frame");
        thread::sleep(Duration::from_secs(FIRST_FRAME_WAIT_S));
    }

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    let mut relay_req_jh: Option<JoinHandle<()>> = None;
    let mut relay_rep_jh: Option<JoinHandle<()>> = None;

    let mut run_detector_sent = false;
    let mut visual_handoff = false;

    let mut cycle_time_accum_s = 0.0;
    let mut cycle_count: u64 = 0;
    let mut num_consec_cycle_overruns: u64 = 0;

    while run.load(Ordering::Relaxed) {
        // Get cycle start time
        let cycle_start_instant = Instant::now();

        // ---- SENSOR FUSION ----

        rdv.arm();

        let lane_input = lane_fusion::InputData {
            frame: inbox.snapshot_frame(),
            cur_vel_ms: state.cur_vel(),
            target_vel_ms: state.setpoints().target_vel_ms,
            bbox: inbox.snapshot_bounding_box(),
            state: state.clone(),
            rdv: rdv.clone(),
            run: run.clone(),
        };

        let object_input = object_fusion::InputData {
            obstacles: inbox.snapshot_obstacles(),
            state: state.clone(),
            rdv: rdv.clone(),
        };

        // Run both fusion stages concurrently. Object fusion's
        // region-of-interest result gates the lane estimate through the
        // rendezvous; both must finish before the velocity law runs.
        let lane_jh = thread::spawn(move || {
            let mut module = lane_fusion;
            let result = module.proc(&lane_input);
            (module, result)
        });
        let object_jh = thread::spawn(move || {
            let mut module = object_fusion;
            let result = module.proc(&object_input);
            (module, result)
        });

        let (module, lane_result) = lane_jh
            .join()
            .map_err(|_| eyre!("The LaneFusion task panicked"))?;
        lane_fusion = module;

        let (module, object_result) = object_jh
            .join()
            .map_err(|_| eyre!("The ObjectFusion task panicked"))?;
        object_fusion = module;

        match lane_result {
            Ok((_, report)) => trace!("LaneFusion report: {:?}", report),
            // A lane fusion error costs this cycle's image only
            Err(e) => warn!("Error during LaneFusion processing: {}", e),
        }

        match object_result {
            Ok((_, report)) => trace!("ObjectFusion report: {:?}", report),
            Err(e) => warn!("Error during ObjectFusion processing: {}", e),
        }

        // ---- SAFETY VELOCITY LAW ----

        let lead = state.lead();
        let setpoints = state.setpoints();

        match safety_ctrl.proc(&safety_ctrl::InputData {
            distance_m: lead.distance_m,
            target_vel_ms: setpoints.target_vel_ms,
            prev_result_vel_ms: state.result_vel(),
        }) {
            Ok((output, report)) => {
                state.set_result_vel(output.result_vel_ms);
                if report.braking {
                    trace!("Emergency brake active");
                }
            }
            Err(e) => warn!("Error during SafetyCtrl processing: {}", e),
        }

        // ---- ACTUATOR COMMAND ----

        let cmd = ActuatorCmd {
            tar_vel_ms: state.result_vel(),
            steer_angle_deg: lead.steer_angle_deg,
            cur_dist_m: lead.distance_m,
            tar_dist_m: setpoints.target_dist_m,
            fi_encoder: state.failure.encoder.is_set(),
            fi_camera: state.failure.camera.is_set(),
            fi_lidar: state.failure.lidar.is_set(),
            beta: state.mode.beta.is_set(),
            gamma: state.mode.gamma.is_set(),
        };

        if let Err(e) = actuator_server.send(&cmd) {
            warn!("ActuatorServer error: {}", e);
        }

        // ---- DEGRADED MODE ONE-SHOTS ----

        // The first time the lidar degrades, ask for the heavy obstacle
        // classifier
        if cmd.gamma && !run_detector_sent {
            run_detector_sent = true;

            match actuator_server.send_run_detector() {
                Ok(()) => info!("Lidar degraded, obstacle classifier requested"),
                Err(e) => warn!("Could not publish the detector flag: {}", e),
            }
        }

        // The first time both sensors are degraded, raise the visual
        // handoff request
        if cmd.gamma && cmd.beta && !visual_handoff {
            visual_handoff = true;
            info!("Camera and lidar degraded, visual handoff requested");
        }

        // ---- IMAGE RELAY ----

        // Start the request loop once the center asks this vehicle to
        // stream its rear camera
        if relay_req_jh.is_none()
            && role.sends_rear_image()
            && state.mode.send_rear_image.load(Ordering::Relaxed)
        {
            let ctx = zmq_ctx.clone();
            let endpoint = exec_params.relay_req_endpoint.clone();
            let inbox = inbox.clone();
            let run = run.clone();

            relay_req_jh = Some(thread::spawn(move || {
                image_relay::request_loop(ctx, endpoint, role, inbox, run)
            }));
        }

        // Start the reply loop once the visual handoff condition holds
        if relay_rep_jh.is_none() && role.consumes_rear_image() && visual_handoff {
            let ctx = zmq_ctx.clone();
            let rep_endpoint = exec_params.relay_rep_endpoint.clone();
            let pub_endpoint = exec_params.relay_pub_endpoint.clone();
            let state = state.clone();
            let session = session.clone();
            let run = run.clone();

            relay_rep_jh = Some(thread::spawn(move || {
                image_relay::reply_loop(ctx, rep_endpoint, pub_endpoint, state, session, run)
            }));
        }

        // ---- RUN LOG ----

        let record = DistRecord {
            time_s: session::get_elapsed_seconds(),
            measured_dist_m: lead.distance_m,
            estimated_dist_m: state.lane().est_dist_m,
        };

        if let Err(e) = dist_archiver.serialise(record) {
            warn!("Could not write the distance log: {}", e);
        }

        // ---- CYCLE MANAGEMENT ----

        let cycle_dur = Instant::now() - cycle_start_instant;

        cycle_count += 1;
        cycle_time_accum_s += cycle_dur.as_secs_f64();
        trace!(
            "Mean cycle time: {:.6} s",
            cycle_time_accum_s / cycle_count as f64
        );

        if cycle_count > CYCLE_TIME_RESET_CYCLES {
            cycle_time_accum_s = 0.0;
            cycle_count = 0;
        }

        // Get sleep duration
        match Duration::from_secs_f64(CYCLE_PERIOD_S).checked_sub(cycle_dur) {
            Some(d) => {
                num_consec_cycle_overruns = 0;
                thread::sleep(d);
            }
            None => {
                warn!(
                    "Cycle overran by {:.06} s ({} consecutive)",
                    cycle_dur.as_secs_f64() - CYCLE_PERIOD_S,
                    num_consec_cycle_overruns + 1
                );
                num_consec_cycle_overruns += 1;
            }
        }
    }

    // ---- SHUTDOWN ----

    info!("Shutdown requested");

    // Publish one final stop command so the actuator node is never left
    // holding a live velocity demand
    let lead = state.lead();
    let stop_cmd = ActuatorCmd {
        tar_vel_ms: 0.0,
        steer_angle_deg: lead.steer_angle_deg,
        cur_dist_m: lead.distance_m,
        tar_dist_m: state.setpoints().target_dist_m,
        fi_encoder: state.failure.encoder.is_set(),
        fi_camera: state.failure.camera.is_set(),
        fi_lidar: state.failure.lidar.is_set(),
        beta: state.mode.beta.is_set(),
        gamma: state.mode.gamma.is_set(),
    };

    if let Err(e) = actuator_server.send(&stop_cmd) {
        warn!("Could not publish the final stop command: {}", e);
    }

    // Join the background loops
    sensor_jh
        .join()
        .map_err(|_| eyre!("The sensor loop panicked"))?;
    sync_jh
        .join()
        .map_err(|_| eyre!("The sync loop panicked"))?;

    if let Some(jh) = relay_req_jh {
        jh.join()
            .map_err(|_| eyre!("The image relay request loop panicked"))?;
    }
    if let Some(jh) = relay_rep_jh {
        jh.join()
            .map_err(|_| eyre!("The image relay reply loop panicked"))?;
    }

    info!("End of execution");

    Ok(())
}
