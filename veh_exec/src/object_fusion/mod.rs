//! Object fusion module
//!
//! Turns the latest lidar obstacle list into a distance and angle to the
//! nearest relevant obstacle ahead, computes the pure-pursuit steering
//! correction used when the camera is degraded, and derives the dynamic
//! region-of-interest offset consumed by lane fusion.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
pub use params::*;
pub use state::*;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during ObjectFusion operation.
///
/// Fusion over an empty or missing obstacle list is not an error; the module
/// simply leaves the lead state untouched for that cycle.
#[derive(Debug, thiserror::Error)]
pub enum ObjectFusionError {}
