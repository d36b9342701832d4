//! # Sync Server
//!
//! Answers the control center's polling requests with a telemetry snapshot
//! and applies the setpoints and failure flags delivered with each request.
//! The exchange runs on its own short interval, independent of the control
//! cycle, so command latency stays bounded regardless of fusion cost.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{info, warn};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use comms_if::{
    ctrl::CcMode,
    net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions},
    node::{NodeId, VehicleRole},
    sync::{SyncReply, SyncRequest},
};

use crate::{
    ctrl_state::{CtrlState, STARTUP_TARGET_DIST_M},
    params::VehExecParams,
    safety_ctrl,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Interval between exchange iterations.
///
/// Units: milliseconds
pub const EXCHANGE_INTERVAL_MS: u64 = 2;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The sync server socket wrapper.
pub struct SyncServer {
    socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SyncServerError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not send the reply: {0}")]
    SendError(zmq::Error),

    #[error("Could not recieve a request: {0}")]
    RecvError(zmq::Error),

    #[error("Could not serialize the reply: {0}")]
    SerializationError(serde_json::Error),

    #[error("The control center sent a message which was not valid UTF-8")]
    NonUtf8Request,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SyncServer {
    /// Create a new instance of the sync server.
    ///
    /// This function will not block until the control center connects.
    pub fn new(ctx: &zmq::Context, params: &VehExecParams) -> Result<Self, SyncServerError> {
        // Create the socket options
        let socket_options = SocketOptions {
            block_on_first_connect: false,
            bind: true,
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            recv_timeout: 1,
            send_timeout: 10,
            ..Default::default()
        };

        // Bind the socket
        let socket = MonitoredSocket::new(
            ctx,
            zmq::REP,
            socket_options,
            &params.sync_rep_endpoint,
        )
        .map_err(SyncServerError::SocketError)?;

        // Create self
        Ok(Self { socket })
    }

    /// Poll for the next pending request payload.
    ///
    /// Returns `Ok(None)` if no request arrived within the receive timeout.
    pub fn poll(&self) -> Result<Option<String>, SyncServerError> {
        match self.socket.recv_string(0) {
            // Valid message
            Ok(Ok(s)) => Ok(Some(s)),
            // Non UTF-8 message
            Ok(Err(_)) => Err(SyncServerError::NonUtf8Request),
            // No message in timeout
            Err(zmq::Error::EAGAIN) => Ok(None),
            // Recieve error
            Err(e) => Err(SyncServerError::RecvError(e)),
        }
    }

    /// Send the telemetry reply for the pending request.
    pub fn send_reply(&self, reply: &SyncReply) -> Result<(), SyncServerError> {
        let reply_str =
            serde_json::to_string(reply).map_err(SyncServerError::SerializationError)?;

        self.socket
            .send(&reply_str, 0)
            .map_err(SyncServerError::SendError)
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Map the last raw setpoints from the control center through the current
/// mode.
///
/// Stop forces a zero target velocity. Remote command mode puts a ceiling on
/// the velocity and a floor under the distance. Target mode passes both
/// values through unmodified.
pub fn arbitrate(
    mode: CcMode,
    cc_vel_ms: f64,
    cc_dist_m: f64,
    params: &safety_ctrl::Params,
) -> (f64, f64) {
    match mode {
        CcMode::Stop => (0.0, cc_dist_m),
        CcMode::RemoteCommand => (
            cc_vel_ms.min(params.rcm_vel_ms),
            cc_dist_m.max(params.rcm_dist_m),
        ),
        CcMode::Target => (cc_vel_ms, cc_dist_m),
    }
}

/// Build the telemetry reply from the current control state.
pub fn build_reply(role: VehicleRole, state: &CtrlState) -> SyncReply {
    let lead = state.lead();

    SyncReply {
        src: role.node_id(),
        cur_vel_ms: state.cur_vel(),
        cur_dist_m: lead.distance_m,
        cur_angle_deg: lead.steer_angle_deg,
        coef: state.lane().coef,
    }
}

/// Run the sync exchange loop until the run flag clears.
pub fn run(
    server: SyncServer,
    role: VehicleRole,
    state: Arc<CtrlState>,
    safety_params: safety_ctrl::Params,
    run: Arc<AtomicBool>,
) {
    // Last raw setpoints received from the center, retained so a mode change
    // between polls can be re-applied to them
    let mut cc_vel_ms = 0.0;
    let mut cc_dist_m = STARTUP_TARGET_DIST_M;

    info!("Sync exchange loop started");

    while run.load(Ordering::Relaxed) {
        // Re-apply the mode policy to the retained values ahead of the
        // exchange. The post-receive pass below is the authoritative one;
        // this reapplication is kept for parity with the exchange protocol
        // and is redundant when a request arrives in the same iteration.
        if role.is_leader() {
            match state.cc_mode() {
                CcMode::Stop => state.set_target_vel(0.0),
                CcMode::RemoteCommand => {
                    let (vel, dist) =
                        arbitrate(CcMode::RemoteCommand, cc_vel_ms, cc_dist_m, &safety_params);
                    state.set_setpoints(vel, dist);
                }
                CcMode::Target => (),
            }
        }

        match server.poll() {
            Ok(Some(payload)) => {
                // Answer with the snapshot first, then consume the request
                let reply = build_reply(role, &state);
                if let Err(e) = server.send_reply(&reply) {
                    warn!("Could not reply to the control center: {}", e);
                }

                match serde_json::from_str::<SyncRequest>(&payload) {
                    Ok(request) => apply_request(
                        role,
                        &state,
                        &request,
                        &mut cc_vel_ms,
                        &mut cc_dist_m,
                        &safety_params,
                    ),
                    Err(e) => warn!("Could not parse the control center request: {}", e),
                }
            }
            Ok(None) => (),
            Err(e @ SyncServerError::NonUtf8Request) => {
                warn!("Sync exchange error: {}", e);

                // The request was received even though it was unreadable, so
                // answer anyway to keep the request/reply pairing intact
                let reply = build_reply(role, &state);
                server.send_reply(&reply).ok();
            }
            Err(e) => warn!("Sync exchange error: {}", e),
        }

        thread::sleep(Duration::from_millis(EXCHANGE_INTERVAL_MS));
    }

    info!("Sync exchange loop stopped");
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Apply one request from the control center to the control state.
fn apply_request(
    role: VehicleRole,
    state: &CtrlState,
    request: &SyncRequest,
    cc_vel_ms: &mut f64,
    cc_dist_m: &mut f64,
    safety_params: &safety_ctrl::Params,
) {
    if request.src != NodeId::Cc {
        warn!("Ignoring sync request from {:?}", request.src);
        return;
    }

    if role.is_leader() {
        // The leader retains the raw values and maps them through the
        // current mode
        *cc_vel_ms = request.tar_vel_ms;
        *cc_dist_m = request.tar_dist_m;

        let (vel, dist) = arbitrate(state.cc_mode(), *cc_vel_ms, *cc_dist_m, safety_params);
        state.set_setpoints(vel, dist);
    } else {
        // Followers adopt the center's setpoints verbatim
        state.set_setpoints(request.tar_vel_ms, request.tar_dist_m);
    }

    // Failure flags are OR'd into the local latches, giving the center
    // authority to declare a failure on this vehicle's behalf
    if request.fi_encoder {
        state.failure.encoder.set();
    }
    if request.fi_camera {
        state.failure.camera.set();
    }
    if request.fi_lidar {
        state.failure.lidar.set();
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn request(tar_vel_ms: f64, tar_dist_m: f64) -> SyncRequest {
        SyncRequest {
            src: NodeId::Cc,
            tar_vel_ms,
            tar_dist_m,
            fi_encoder: false,
            fi_camera: false,
            fi_lidar: false,
        }
    }

    #[test]
    fn test_arbitrate_stop_forces_zero_velocity() {
        let params = safety_ctrl::Params::default();
        let (vel, dist) = arbitrate(CcMode::Stop, 0.6, 1.0, &params);
        assert_eq!(vel, 0.0);
        assert_eq!(dist, 1.0);
    }

    #[test]
    fn test_arbitrate_remote_command_clamps() {
        // Ceiling of 0.8 on velocity, floor of 0.8 under distance
        let params = safety_ctrl::Params::default();

        let (vel, dist) = arbitrate(CcMode::RemoteCommand, 1.0, 0.5, &params);
        assert_eq!(vel, 0.8);
        assert_eq!(dist, 0.8);

        // Values inside the bounds pass through
        let (vel, dist) = arbitrate(CcMode::RemoteCommand, 0.4, 1.2, &params);
        assert_eq!(vel, 0.4);
        assert_eq!(dist, 1.2);
    }

    #[test]
    fn test_arbitrate_target_mode_passes_through() {
        let params = safety_ctrl::Params::default();
        let (vel, dist) = arbitrate(CcMode::Target, 1.0, 0.5, &params);
        assert_eq!(vel, 1.0);
        assert_eq!(dist, 0.5);
    }

    #[test]
    fn test_leader_remote_command_clamp_applied_on_receive() {
        let state = CtrlState::default();
        state.set_cc_mode(CcMode::RemoteCommand);

        let params = safety_ctrl::Params::default();
        let (mut cc_vel, mut cc_dist) = (0.0, STARTUP_TARGET_DIST_M);

        apply_request(
            VehicleRole::Lv,
            &state,
            &request(1.0, 0.8),
            &mut cc_vel,
            &mut cc_dist,
            &params,
        );

        // The raw value is retained but the active setpoint is clamped
        assert_eq!(cc_vel, 1.0);
        assert_eq!(state.setpoints().target_vel_ms, 0.8);
    }

    #[test]
    fn test_follower_adopts_setpoints_verbatim() {
        let state = CtrlState::default();
        // Mode is ignored by followers even if set
        state.set_cc_mode(CcMode::RemoteCommand);

        let params = safety_ctrl::Params::default();
        let (mut cc_vel, mut cc_dist) = (0.0, STARTUP_TARGET_DIST_M);

        apply_request(
            VehicleRole::Fv1,
            &state,
            &request(1.0, 0.4),
            &mut cc_vel,
            &mut cc_dist,
            &params,
        );

        let sp = state.setpoints();
        assert_eq!(sp.target_vel_ms, 1.0);
        assert_eq!(sp.target_dist_m, 0.4);
    }

    #[test]
    fn test_failure_flags_or_into_latches() {
        let state = CtrlState::default();
        let params = safety_ctrl::Params::default();
        let (mut cc_vel, mut cc_dist) = (0.0, STARTUP_TARGET_DIST_M);

        let mut req = request(0.5, 0.8);
        req.fi_camera = true;

        apply_request(
            VehicleRole::Fv1,
            &state,
            &req,
            &mut cc_vel,
            &mut cc_dist,
            &params,
        );
        assert!(state.failure.camera.is_set());
        assert!(!state.failure.lidar.is_set());

        // A later request with the flag clear does not reset the latch
        apply_request(
            VehicleRole::Fv1,
            &state,
            &request(0.5, 0.8),
            &mut cc_vel,
            &mut cc_dist,
            &params,
        );
        assert!(state.failure.camera.is_set());
    }

    #[test]
    fn test_reply_snapshot_matches_state() {
        let state = CtrlState::default();
        state.set_cur_vel(0.42);
        state.set_lead(0.91, -1.5);
        state.set_steer_angle(3.25);

        let reply = build_reply(VehicleRole::Fv2, &state);
        assert_eq!(reply.src, NodeId::Fv2);
        assert_eq!(reply.cur_vel_ms, 0.42);
        assert_eq!(reply.cur_dist_m, 0.91);
        assert_eq!(reply.cur_angle_deg, 3.25);
    }
}
