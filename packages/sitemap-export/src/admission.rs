//! In-flight ceiling for export requests.
//!
//! Export requests cost about the same, so a single counter is enough
//! backpressure: past the ceiling, callers are told to come back later
//! instead of queuing behind the database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct AdmissionController {
    in_flight: AtomicUsize,
    ceiling: usize,
}

impl AdmissionController {
    pub fn new(ceiling: usize) -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            ceiling,
        }
    }

    /// Try to take a slot. Every `true` must be paired with one `release()`.
    ///
    /// Prefer [`AdmissionController::try_acquire`], which releases on drop.
    pub fn admit(&self) -> bool {
        // CAS so a rejected caller never bumps the counter past the ceiling.
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.ceiling).then_some(n + 1)
            })
            .is_ok()
    }

    pub fn release(&self) {
        let previous = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "release without admit");
    }

    /// Take a slot that is released when the permit drops, on every exit
    /// path including panics and cancelled futures.
    pub fn try_acquire(self: &Arc<Self>) -> Option<AdmissionPermit> {
        self.admit().then(|| AdmissionPermit {
            controller: Arc::clone(self),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }
}

/// A held admission slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    controller: Arc<AdmissionController>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.controller.release();
    }
}
