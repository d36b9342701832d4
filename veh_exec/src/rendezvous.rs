//! # Per-Cycle Rendezvous
//!
//! Object fusion must publish the dynamic region-of-interest offset before
//! lane fusion hands the frame to the estimator. The rendezvous is a
//! single-notification signal re-armed at the top of every control cycle; it
//! is not a queue, and the wait gives up only when the run flag clears.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Condvar, Mutex,
};
use std::time::Duration;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// How long one wait slice lasts before the run flag is rechecked.
const WAIT_SLICE_MS: u64 = 100;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One-shot signal from object fusion to lane fusion, scoped to a single
/// control cycle.
#[derive(Debug, Default)]
pub struct RoiRendezvous {
    ready: Mutex<bool>,
    cond: Condvar,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RoiRendezvous {
    /// Re-arm the rendezvous at the top of a cycle.
    pub fn arm(&self) {
        *self.ready.lock().expect("RoiRendezvous: mutex poisoned") = false;
    }

    /// Signal that the region-of-interest offset is available.
    pub fn signal(&self) {
        *self.ready.lock().expect("RoiRendezvous: mutex poisoned") = true;
        self.cond.notify_one();
    }

    /// Block until the rendezvous is signalled.
    ///
    /// Returns `true` when the signal arrived, `false` if the run flag
    /// cleared first (shutdown).
    pub fn wait(&self, run: &AtomicBool) -> bool {
        let mut ready = self.ready.lock().expect("RoiRendezvous: mutex poisoned");

        while !*ready {
            if !run.load(Ordering::Relaxed) {
                return false;
            }

            let (guard, _) = self
                .cond
                .wait_timeout(ready, Duration::from_millis(WAIT_SLICE_MS))
                .expect("RoiRendezvous: mutex poisoned");
            ready = guard;
        }

        true
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_signal_releases_wait() {
        let rdv = Arc::new(RoiRendezvous::default());
        let run = Arc::new(AtomicBool::new(true));

        rdv.arm();

        let rdv_clone = rdv.clone();
        let run_clone = run.clone();
        let jh = thread::spawn(move || rdv_clone.wait(&run_clone));

        rdv.signal();
        assert!(jh.join().unwrap());
    }

    #[test]
    fn test_wait_gives_up_on_shutdown() {
        let rdv = RoiRendezvous::default();
        let run = AtomicBool::new(false);

        rdv.arm();
        assert!(!rdv.wait(&run));
    }

    #[test]
    fn test_signal_before_wait_is_not_lost() {
        let rdv = RoiRendezvous::default();
        let run = AtomicBool::new(true);

        rdv.arm();
        rdv.signal();
        assert!(rdv.wait(&run));
    }
}
