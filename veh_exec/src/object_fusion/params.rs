//! Parameters structure for ObjectFusion

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for object fusion.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    // ---- GEOMETRY ----
    /// Wheelbase used by the pure-pursuit correction.
    ///
    /// Units: meters
    pub wheelbase_m: f64,

    /// Lateral calibration offset applied to every obstacle center.
    ///
    /// Units: meters
    pub lateral_offset_m: f64,

    // ---- REGION OF INTEREST ----
    /// Inner edge of the distance window in which the region of interest is
    /// narrowed.
    ///
    /// Units: meters
    pub roi_near_m: f64,

    /// Outer edge of the distance window in which the region of interest is
    /// narrowed.
    ///
    /// Units: meters
    pub roi_far_m: f64,

    /// Scale from distance inside the window to image-row offset.
    ///
    /// Units: pixels/meter
    pub roi_scale_px_per_m: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            wheelbase_m: 0.40,
            lateral_offset_m: 0.03,
            roi_near_m: 0.30,
            roi_far_m: 1.24,
            roi_scale_px_per_m: 490.0,
        }
    }
}
