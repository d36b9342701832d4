//! Safety controller module
//!
//! Maps the fused distance to the vehicle ahead and the commanded target
//! velocity into the bounded output velocity actually published downstream.
//! The velocity law depends on the vehicle's role and is selected once at
//! initialisation.

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
// CONSTANTS
// ---------------------------------------------------------------------------

/// Target velocities at or below this value command a follower to a
/// standstill regardless of distance.
///
/// Units: meters/second
pub const FV_VEL_CUTOFF_MS: f64 = 0.1;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during SafetyCtrl operation.
#[derive(Debug, thiserror::Error)]
pub enum SafetyCtrlError {
    #[error("The velocity law has not been selected, was init skipped?")]
    NotInitialised,
}
