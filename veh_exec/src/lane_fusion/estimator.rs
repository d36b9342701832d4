//! # Lane Estimator Client
//!
//! The curve fitting itself runs in an external process; this client hands
//! it the frame for the current cycle and receives the fitted curves and
//! steering angle back over a request/reply socket.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    lane::{LaneRequest, LaneResponse},
    net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions},
};

use crate::params::VehExecParams;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// The seam between lane fusion and the external curve fitting process.
///
/// Production code talks to the estimator process through [`LaneEstClient`];
/// tests substitute a fake.
pub trait LaneEstimator: Send {
    /// Estimate lane geometry for one frame.
    fn estimate(&mut self, request: &LaneRequest) -> Result<LaneResponse, LaneEstError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Request/reply client to the external lane estimation process.
pub struct LaneEstClient {
    socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LaneEstError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("The client is not connected to the estimator")]
    NotConnected,

    #[error("Could not send the frame to the estimator: {0}")]
    SendError(zmq::Error),

    #[error("Could not recieve a response from the estimator: {0}")]
    RecvError(zmq::Error),

    #[error("The estimator did not respond within the receive timeout")]
    NoResponse,

    #[error("Could not serialize the request: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not deserialize the response from the estimator: {0}")]
    DeserializeError(serde_json::Error),

    #[error("The estimator responded with a message which was not valid UTF-8")]
    NonUtf8Response,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl LaneEstClient {
    /// Create a new instance of the lane estimator client.
    ///
    /// This function will not block until the estimator connects.
    pub fn new(ctx: &zmq::Context, params: &VehExecParams) -> Result<Self, LaneEstError> {
        // Create the socket options
        let socket_options = SocketOptions {
            block_on_first_connect: false,
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            recv_timeout: 40,
            send_timeout: 10,
            req_correlate: true,
            req_relaxed: true,
            ..Default::default()
        };

        // Connect the socket
        let socket = MonitoredSocket::new(
            ctx,
            zmq::REQ,
            socket_options,
            &params.lane_req_endpoint,
        )
        .map_err(LaneEstError::SocketError)?;

        // Create self
        Ok(Self { socket })
    }
}

impl LaneEstimator for LaneEstClient {
    fn estimate(&mut self, request: &LaneRequest) -> Result<LaneResponse, LaneEstError> {
        // If not connected return an error
        if !self.socket.connected() {
            return Err(LaneEstError::NotConnected);
        }

        // Serialize the request
        let request_str =
            serde_json::to_string(request).map_err(LaneEstError::SerializationError)?;

        // Send the request
        self.socket
            .send(&request_str, 0)
            .map_err(LaneEstError::SendError)?;

        // Read the response from the estimator
        let response_str = match self.socket.recv_string(0) {
            // Valid response
            Ok(Ok(s)) => s,
            // Invalid response
            Ok(Err(_)) => return Err(LaneEstError::NonUtf8Response),
            // No response within the timeout
            Err(zmq::Error::EAGAIN) => return Err(LaneEstError::NoResponse),
            // Recv error
            Err(e) => return Err(LaneEstError::RecvError(e)),
        };

        // Deserialize the response
        serde_json::from_str(&response_str).map_err(LaneEstError::DeserializeError)
    }
}
