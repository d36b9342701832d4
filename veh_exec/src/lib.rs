//! # Vehicle library.
//!
//! This library allows other crates in the workspace to access items defined inside the vehicle
//! crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Actuator server - publishes the per-cycle actuator command and one-shot flags
pub mod actuator_server;

/// Shared control state - the per-group guarded aggregate read and written by every loop
pub mod ctrl_state;

/// Image relay - on-demand rear-camera handoff between consecutive vehicles
pub mod image_relay;

/// Lane fusion module - turns camera frames into a steering angle and lane curves
pub mod lane_fusion;

/// Object fusion module - turns the lidar obstacle list into distance/angle to the lead vehicle
pub mod object_fusion;

/// Executable parameters
pub mod params;

/// Per-cycle rendezvous between object fusion and lane fusion
pub mod rendezvous;

/// Safety controller module - the role-dependent velocity law
pub mod safety_ctrl;

/// Sensor client - receives sensor and command messages from the local bus
pub mod sensor_client;

/// Sensor inbox - latest-value caches filled by the sensor client
pub mod sensor_inbox;

/// Sync server - answers the control center's polling requests
pub mod sync_server;
