//! Last-known marker coordinates shared between the analysis thread and the
//! receiver's negotiation loop.
//!
//! `x` and `y` live behind independent locks. A reader may observe `x` from
//! one analysis cycle and `y` from another; each component is always a value
//! some writer stored in full.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::types::Coordinates;

/// Shared handle passed to the analysis worker and the negotiator.
pub type SharedCoordinates = Arc<SharedCoordinateState>;

#[derive(Debug, Default)]
pub struct SharedCoordinateState {
    x: Mutex<i32>,
    y: Mutex<i32>,
}

impl SharedCoordinateState {
    pub fn new() -> SharedCoordinates {
        Arc::new(Self::default())
    }

    /// Overwrites both cells, acquiring each lock on its own.
    pub fn store(&self, coords: Coordinates) {
        *lock(&self.x) = coords.x;
        *lock(&self.y) = coords.y;
    }

    /// Reads both cells, acquiring each lock on its own.
    pub fn load(&self) -> Coordinates {
        let x = *lock(&self.x);
        let y = *lock(&self.y);
        Coordinates { x, y }
    }
}

fn lock(cell: &Mutex<i32>) -> MutexGuard<'_, i32> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}
