//! # Vehicle Executable Parameters
//!
//! This module provides parameters for the vehicle executable.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::node::VehicleRole;
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
pub struct VehExecParams {
    /// Role of this vehicle within the platoon
    pub role: VehicleRole,

    /// Network endpoint for the local sensor bus subscription
    pub sensor_sub_endpoint: String,

    /// Network endpoint for the actuator command publisher
    pub actuator_pub_endpoint: String,

    /// Network endpoint the control center polls for telemetry
    pub sync_rep_endpoint: String,

    /// Network endpoint of the external lane estimation process
    pub lane_req_endpoint: String,

    /// Network endpoint of the following vehicle's image relay server
    pub relay_req_endpoint: String,

    /// Network endpoint this vehicle's image relay server binds to
    pub relay_rep_endpoint: String,

    /// Network endpoint for republishing relayed images on the local bus
    pub relay_pub_endpoint: String,
}
