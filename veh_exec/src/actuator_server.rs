//! # Actuator Server
//!
//! Publishes the per-cycle actuator command and the one-shot detector flag
//! on the local vehicle bus.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    ctrl::{ActuatorCmd, DetectorFlag},
    net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions},
    topic,
};

use crate::params::VehExecParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Actuator command publisher
pub struct ActuatorServer {
    socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ActuatorServerError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not send the command: {0}")]
    SendError(zmq::Error),

    #[error("Could not serialize the command: {0}")]
    SerializationError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ActuatorServer {
    /// Create a new instance of the actuator server.
    ///
    /// This function will not block until a subscriber connects.
    pub fn new(ctx: &zmq::Context, params: &VehExecParams) -> Result<Self, ActuatorServerError> {
        // Create the socket options
        let socket_options = SocketOptions {
            block_on_first_connect: false,
            bind: true,
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            recv_timeout: 10,
            send_timeout: 10,
            ..Default::default()
        };

        // Bind the socket
        let socket = MonitoredSocket::new(
            ctx,
            zmq::PUB,
            socket_options,
            &params.actuator_pub_endpoint,
        )
        .map_err(ActuatorServerError::SocketError)?;

        // Create self
        Ok(Self { socket })
    }

    /// Publish the actuator command for this cycle.
    pub fn send(&mut self, cmd: &ActuatorCmd) -> Result<(), ActuatorServerError> {
        let cmd_str = serde_json::to_string(cmd).map_err(ActuatorServerError::SerializationError)?;

        self.socket
            .send(&format!("{} {}", topic::ACTUATOR, cmd_str), 0)
            .map_err(ActuatorServerError::SendError)
    }

    /// Publish the one-shot flag asking for the heavy obstacle classifier.
    pub fn send_run_detector(&mut self) -> Result<(), ActuatorServerError> {
        let flag_str = serde_json::to_string(&DetectorFlag { run_detector: true })
            .map_err(ActuatorServerError::SerializationError)?;

        self.socket
            .send(&format!("{} {}", topic::RUN_DETECTOR, flag_str), 0)
            .map_err(ActuatorServerError::SendError)
    }
}
