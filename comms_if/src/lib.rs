//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the platoon software:
//! the wire message types exchanged between the vehicle executables, the
//! control center, and the sensor/actuator nodes, plus the networking layer
//! they travel over.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Downstream command and actuator message definitions
pub mod ctrl;

/// Request/response pair for the external lane estimation process
pub mod lane;

/// Network module
pub mod net;

/// Node identities within the convoy
pub mod node;

/// Rear-camera image relay messages
pub mod relay;

/// Sensor messages published on the local vehicle bus
pub mod sensor;

/// Control center synchronisation messages
pub mod sync;

// ------------------------------------------------------------------------------------------------
// TOPICS
// ------------------------------------------------------------------------------------------------

/// Topic strings used on the PUB/SUB vehicle bus.
///
/// Topics are sent as a space-separated envelope ahead of the JSON payload,
/// allowing subscribers to filter with `set_subscribe`.
pub mod topic {
    /// Forward camera frame
    pub const FRAME: &str = "frame";

    /// Rear camera frame
    pub const REAR_FRAME: &str = "rear_frame";

    /// Lidar-derived obstacle list
    pub const OBSTACLES: &str = "obstacles";

    /// Detector bounding box
    pub const BBOX: &str = "bbox";

    /// Downstream command from the local actuator node
    pub const CMD: &str = "cmd";

    /// External lidar error code
    pub const LIDAR_ERR: &str = "lidar_err";

    /// Actuator command published once per control cycle
    pub const ACTUATOR: &str = "actuator";

    /// One-shot flag requesting the heavy obstacle detector be started
    pub const RUN_DETECTOR: &str = "run_detector";

    /// Relayed view of the preceding vehicle, republished locally
    pub const PRECEDING: &str = "preceding";
}
