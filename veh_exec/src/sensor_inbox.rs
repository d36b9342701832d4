//! # Sensor Inbox
//!
//! Latest-value caches for the asynchronous sensor streams. Each `put_*`
//! call atomically replaces the stored value without blocking the producer;
//! older values are dropped, never queued. Readers take deep-copy snapshots
//! so the fusion stages can run unsynchronised afterwards.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

use comms_if::sensor::{BoundingBox, ObstacleList, SensorFrame};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Latest-value caches for the sensor streams.
#[derive(Debug, Default)]
pub struct SensorInbox {
    /// The most recent forward camera frame
    frame: Mutex<Option<SensorFrame>>,

    /// The most recent rear camera frame
    rear_frame: Mutex<Option<SensorFrame>>,

    /// The most recent lidar obstacle list
    obstacles: Mutex<Option<ObstacleList>>,

    /// The most recent valid detector bounding box
    bbox: Mutex<BoundingBox>,

    /// Set once the first forward frame has arrived, gating loop startup
    frame_seen: AtomicBool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SensorInbox {
    /// Replace the stored forward frame.
    pub fn put_frame(&self, frame: SensorFrame) {
        *self.frame.lock().expect("SensorInbox: frame mutex poisoned") = Some(frame);
        self.frame_seen.store(true, Ordering::Relaxed);
    }

    /// Replace the stored rear frame.
    pub fn put_rear_frame(&self, frame: SensorFrame) {
        *self
            .rear_frame
            .lock()
            .expect("SensorInbox: rear_frame mutex poisoned") = Some(frame);
    }

    /// Replace the stored obstacle list.
    pub fn put_obstacles(&self, obstacles: ObstacleList) {
        *self
            .obstacles
            .lock()
            .expect("SensorInbox: obstacles mutex poisoned") = Some(obstacles);
    }

    /// Replace the stored bounding box.
    ///
    /// Boxes with any coordinate outside the sensor's pixel bounds are
    /// silently dropped, retaining the previous box.
    pub fn put_bounding_box(&self, bbox: BoundingBox) {
        if bbox.in_sensor_bounds() {
            *self.bbox.lock().expect("SensorInbox: bbox mutex poisoned") = bbox;
        }
    }

    /// Deep-copy snapshot of the most recent forward frame.
    pub fn snapshot_frame(&self) -> Option<SensorFrame> {
        self.frame
            .lock()
            .expect("SensorInbox: frame mutex poisoned")
            .clone()
    }

    /// Deep-copy snapshot of the most recent rear frame.
    pub fn snapshot_rear_frame(&self) -> Option<SensorFrame> {
        self.rear_frame
            .lock()
            .expect("SensorInbox: rear_frame mutex poisoned")
            .clone()
    }

    /// Snapshot of the most recent obstacle list.
    pub fn snapshot_obstacles(&self) -> Option<ObstacleList> {
        self.obstacles
            .lock()
            .expect("SensorInbox: obstacles mutex poisoned")
            .clone()
    }

    /// Snapshot of the most recent valid bounding box.
    pub fn snapshot_bounding_box(&self) -> BoundingBox {
        self.bbox
            .lock()
            .expect("SensorInbox: bbox mutex poisoned")
            .clone()
    }

    /// Return true once at least one forward frame has arrived.
    pub fn frame_seen(&self) -> bool {
        self.frame_seen.load(Ordering::Relaxed)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;

    fn frame(fill: u8) -> SensorFrame {
        SensorFrame {
            timestamp: Utc::now(),
            width: 2,
            height: 2,
            data: vec![fill; 12],
        }
    }

    #[test]
    fn test_latest_value_overwrite() {
        let inbox = SensorInbox::default();
        assert!(inbox.snapshot_frame().is_none());
        assert!(!inbox.frame_seen());

        inbox.put_frame(frame(1));
        inbox.put_frame(frame(2));

        // Only the most recent value is retained
        let snap = inbox.snapshot_frame().unwrap();
        assert_eq!(snap.data, vec![2; 12]);
        assert!(inbox.frame_seen());
    }

    #[test]
    fn test_snapshot_is_deep_copy() {
        let inbox = SensorInbox::default();
        inbox.put_frame(frame(7));

        let mut snap = inbox.snapshot_frame().unwrap();
        snap.data[0] = 0;

        // Mutating the snapshot leaves the stored frame untouched
        assert_eq!(inbox.snapshot_frame().unwrap().data[0], 7);
    }

    #[test]
    fn test_bad_bbox_retains_previous() {
        let inbox = SensorInbox::default();

        let valid = BoundingBox {
            name: "truck".into(),
            x: 100,
            y: 50,
            w: 200,
            h: 150,
        };
        inbox.put_bounding_box(valid.clone());

        // An out-of-range update is dropped
        inbox.put_bounding_box(BoundingBox {
            name: "truck".into(),
            x: 900,
            y: 50,
            w: 200,
            h: 150,
        });

        assert_eq!(inbox.snapshot_bounding_box(), valid);
    }
}
