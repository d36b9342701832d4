//! # Sensor Bus Messages
//!
//! Messages published by the forward/rear camera nodes, the lidar obstacle
//! detector, and the visual object detector on the local vehicle bus.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{serde::ts_milliseconds, DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Width of the camera sensors in pixels.
pub const FRAME_WIDTH_PX: u32 = 640;

/// Height of the camera sensors in pixels.
pub const FRAME_HEIGHT_PX: u32 = 480;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An uncompressed camera frame in BGR8 pixel order.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SensorFrame {
    /// UTC timestamp at which the frame was acquired
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Width of the frame in pixels
    pub width: u32,

    /// Height of the frame in pixels
    pub height: u32,

    /// Raw BGR8 pixel data, `width * height * 3` bytes
    pub data: Vec<u8>,
}

/// A single circular obstacle detected by the lidar.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq)]
pub struct Circle {
    /// Longitudinal position of the circle center in the vehicle frame.
    ///
    /// Units: meters, negative ahead of the sensor.
    pub center_x_m: f64,

    /// Lateral position of the circle center in the vehicle frame.
    ///
    /// Units: meters
    pub center_y_m: f64,

    /// Radius of the circle.
    ///
    /// Units: meters
    pub radius_m: f64,
}

/// The obstacle list published by the lidar detector.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ObstacleList {
    /// Circular obstacle models, unordered
    pub circles: Vec<Circle>,
}

/// A bounding box from the visual object detector.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct BoundingBox {
    /// Class name of the detected object
    pub name: String,

    /// Left edge of the box in pixels
    pub x: u32,

    /// Top edge of the box in pixels
    pub y: u32,

    /// Width of the box in pixels
    pub w: u32,

    /// Height of the box in pixels
    pub h: u32,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SensorFrame {
    /// Number of bytes of pixel data in this frame.
    pub fn len_bytes(&self) -> usize {
        self.data.len()
    }
}

impl BoundingBox {
    /// Return true if every coordinate of this box lies strictly within the
    /// sensor's pixel bounds.
    pub fn in_sensor_bounds(&self) -> bool {
        (self.x > 0 && self.x < FRAME_WIDTH_PX)
            && (self.y > 0 && self.y < FRAME_HEIGHT_PX)
            && (self.w > 0 && self.w < FRAME_WIDTH_PX)
            && (self.h > 0 && self.h < FRAME_HEIGHT_PX)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bbox_bounds() {
        let valid = BoundingBox {
            name: "truck".into(),
            x: 100,
            y: 50,
            w: 200,
            h: 150,
        };
        assert!(valid.in_sensor_bounds());

        // Zero coordinates are out of bounds
        assert!(!BoundingBox {
            x: 0,
            ..valid.clone()
        }
        .in_sensor_bounds());

        // Coordinates at or past the sensor edge are out of bounds
        assert!(!BoundingBox {
            x: FRAME_WIDTH_PX,
            ..valid.clone()
        }
        .in_sensor_bounds());
        assert!(!BoundingBox {
            y: FRAME_HEIGHT_PX,
            ..valid.clone()
        }
        .in_sensor_bounds());
        assert!(!BoundingBox {
            h: 480,
            ..valid
        }
        .in_sensor_bounds());
    }
}
