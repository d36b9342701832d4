//! # Sensor Client
//!
//! Subscribes to the local vehicle bus and fans incoming messages out into
//! the sensor inbox and the shared control state. Runs as its own loop so
//! producers are never blocked by the control cycle.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{error, info, warn};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use comms_if::{
    ctrl::{DownstreamCmd, LidarError, LIDAR_ERR_SENTINEL},
    net::{split_topic, zmq, MonitoredSocket, MonitoredSocketError, SocketOptions},
    node::VehicleRole,
    sensor::{BoundingBox, ObstacleList, SensorFrame},
    topic,
};

use crate::{ctrl_state::CtrlState, params::VehExecParams, sensor_inbox::SensorInbox};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The sensor bus subscriber.
pub struct SensorClient {
    socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SensorClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not subscribe to topic {0}: {1}")]
    SubscribeError(String, zmq::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SensorClient {
    /// Create a new instance of the sensor client.
    ///
    /// This function will not block until the bus publisher connects.
    pub fn new(ctx: &zmq::Context, params: &VehExecParams) -> Result<Self, SensorClientError> {
        // Create the socket options
        let socket_options = SocketOptions {
            block_on_first_connect: false,
            connect_timeout: 1000,
            linger: 1,
            recv_timeout: 10,
            ..Default::default()
        };

        // Connect the socket
        let socket = MonitoredSocket::new(
            ctx,
            zmq::SUB,
            socket_options,
            &params.sensor_sub_endpoint,
        )
        .map_err(SensorClientError::SocketError)?;

        // Subscribe to every topic the vehicle consumes
        for t in &[
            topic::FRAME,
            topic::REAR_FRAME,
            topic::OBSTACLES,
            topic::BBOX,
            topic::CMD,
            topic::LIDAR_ERR,
        ] {
            socket
                .set_subscribe(t.as_bytes())
                .map_err(|e| SensorClientError::SubscribeError(t.to_string(), e))?;
        }

        // Create self
        Ok(Self { socket })
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Run the sensor receive loop until the run flag clears.
pub fn run(
    client: SensorClient,
    role: VehicleRole,
    inbox: Arc<SensorInbox>,
    state: Arc<CtrlState>,
    run: Arc<AtomicBool>,
) {
    info!("Sensor receive loop started");

    while run.load(Ordering::Relaxed) {
        // Read string from the socket
        let msg = match client.socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => {
                warn!("Non UTF-8 message on the sensor bus");
                continue;
            }
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                error!("Error receiving from the sensor bus: {}", e);
                break;
            }
        };

        let (topic, payload) = split_topic(&msg);
        dispatch(role, &inbox, &state, topic, payload);
    }

    info!("Sensor receive loop stopped");
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Apply one bus message to the inbox and control state.
fn dispatch(role: VehicleRole, inbox: &SensorInbox, state: &CtrlState, topic: &str, payload: &str) {
    match topic {
        topic::FRAME => match serde_json::from_str::<SensorFrame>(payload) {
            // A failed camera stops refreshing the cache, so the staleness
            // detector sees a frozen frame
            Ok(frame) => {
                if !state.failure.camera.is_set() {
                    inbox.put_frame(frame);
                }
            }
            Err(e) => warn!("Could not parse frame message: {}", e),
        },

        topic::REAR_FRAME => match serde_json::from_str::<SensorFrame>(payload) {
            Ok(frame) => inbox.put_rear_frame(frame),
            Err(e) => warn!("Could not parse rear frame message: {}", e),
        },

        topic::OBSTACLES => match serde_json::from_str::<ObstacleList>(payload) {
            Ok(obstacles) => inbox.put_obstacles(obstacles),
            Err(e) => warn!("Could not parse obstacle message: {}", e),
        },

        topic::BBOX => match serde_json::from_str::<BoundingBox>(payload) {
            Ok(bbox) => inbox.put_bounding_box(bbox),
            Err(e) => warn!("Could not parse bounding box message: {}", e),
        },

        topic::CMD => match serde_json::from_str::<DownstreamCmd>(payload) {
            Ok(cmd) => {
                state.mode.alpha.store(cmd.alpha, Ordering::Relaxed);
                state.mode.lrc_mode.store(cmd.lrc_mode, Ordering::Relaxed);
                state.set_cc_mode(cmd.crc_mode);
                state.set_cur_vel(cmd.cur_vel_ms);
                state
                    .mode
                    .send_rear_image
                    .store(cmd.send_rear_image, Ordering::Relaxed);

                // Followers take their setpoints from the command stream;
                // the leader's setpoints come from the sync exchange
                if !role.is_leader() {
                    state.set_setpoints(cmd.tar_vel_ms, cmd.tar_dist_m);
                }
            }
            Err(e) => warn!("Could not parse downstream command: {}", e),
        },

        topic::LIDAR_ERR => match serde_json::from_str::<LidarError>(payload) {
            Ok(lidar_err) => {
                let code = if state.failure.lidar.is_set() {
                    LIDAR_ERR_SENTINEL
                } else {
                    lidar_err.code
                };

                state.lidar_err_code.store(code, Ordering::Relaxed);

                if code != 0 {
                    state.mode.gamma.set();
                }
            }
            Err(e) => warn!("Could not parse lidar error message: {}", e),
        },

        _ => warn!("Unrecognised sensor bus topic: {}", topic),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;

    fn cmd_payload(tar_vel_ms: f64) -> String {
        serde_json::to_string(&DownstreamCmd {
            alpha: true,
            lrc_mode: 1,
            crc_mode: comms_if::ctrl::CcMode::Target,
            cur_vel_ms: 0.33,
            tar_vel_ms,
            tar_dist_m: 0.8,
            send_rear_image: true,
        })
        .unwrap()
    }

    #[test]
    fn test_follower_takes_setpoints_from_command() {
        let inbox = SensorInbox::default();
        let state = CtrlState::default();

        dispatch(
            VehicleRole::Fv1,
            &inbox,
            &state,
            topic::CMD,
            &cmd_payload(0.45),
        );

        assert_eq!(state.cur_vel(), 0.33);
        assert_eq!(state.setpoints().target_vel_ms, 0.45);
        assert!(state.mode.alpha.load(Ordering::Relaxed));
        assert!(state.mode.send_rear_image.load(Ordering::Relaxed));
    }

    #[test]
    fn test_leader_setpoints_untouched_by_command() {
        let inbox = SensorInbox::default();
        let state = CtrlState::default();

        dispatch(
            VehicleRole::Lv,
            &inbox,
            &state,
            topic::CMD,
            &cmd_payload(0.45),
        );

        // Odometry is taken but the setpoint belongs to the sync exchange
        assert_eq!(state.cur_vel(), 0.33);
        assert_eq!(state.setpoints().target_vel_ms, 0.0);
    }

    #[test]
    fn test_lidar_error_latches_gamma() {
        let inbox = SensorInbox::default();
        let state = CtrlState::default();

        dispatch(
            VehicleRole::Lv,
            &inbox,
            &state,
            topic::LIDAR_ERR,
            &serde_json::to_string(&LidarError { code: 0x42 }).unwrap(),
        );

        assert!(state.mode.gamma.is_set());
        assert_eq!(state.lidar_err_code.load(Ordering::Relaxed), 0x42);
    }

    #[test]
    fn test_zero_lidar_code_does_not_latch() {
        let inbox = SensorInbox::default();
        let state = CtrlState::default();

        dispatch(
            VehicleRole::Lv,
            &inbox,
            &state,
            topic::LIDAR_ERR,
            &serde_json::to_string(&LidarError { code: 0 }).unwrap(),
        );

        assert!(!state.mode.gamma.is_set());
    }

    #[test]
    fn test_lidar_code_forced_to_sentinel_when_failed() {
        let inbox = SensorInbox::default();
        let state = CtrlState::default();
        state.failure.lidar.set();

        dispatch(
            VehicleRole::Lv,
            &inbox,
            &state,
            topic::LIDAR_ERR,
            &serde_json::to_string(&LidarError { code: 0x42 }).unwrap(),
        );

        assert_eq!(
            state.lidar_err_code.load(Ordering::Relaxed),
            LIDAR_ERR_SENTINEL
        );
        assert!(state.mode.gamma.is_set());
    }

    #[test]
    fn test_failed_camera_freezes_frame_cache() {
        let inbox = SensorInbox::default();
        let state = CtrlState::default();

        let frame = SensorFrame {
            timestamp: Utc::now(),
            width: 2,
            height: 2,
            data: vec![1; 12],
        };
        let payload = serde_json::to_string(&frame).unwrap();

        dispatch(VehicleRole::Lv, &inbox, &state, topic::FRAME, &payload);
        assert!(inbox.frame_seen());

        // Once the camera failure latch is raised new frames are dropped
        state.failure.camera.set();
        let newer = SensorFrame {
            data: vec![9; 12],
            ..frame
        };
        dispatch(
            VehicleRole::Lv,
            &inbox,
            &state,
            topic::FRAME,
            &serde_json::to_string(&newer).unwrap(),
        );

        assert_eq!(inbox.snapshot_frame().unwrap().data, vec![1; 12]);
    }
}
