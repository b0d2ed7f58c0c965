//! Sample buffer
//!
//! Holds the ordered (potential, current) series of the current run. The
//! state machine is the only writer; readers get copies.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

/// One measured sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Applied potential (V)
    pub voltage: f64,
    /// Measured current (µA)
    pub current: f64,
}

impl DataPoint {
    /// Create a new data point
    pub fn new(voltage: f64, current: f64) -> Self {
        Self { voltage, current }
    }
}

/// Append-only sample series shared with read-only views
#[derive(Debug, Default)]
pub struct DataBuffer {
    points: Arc<RwLock<Vec<DataPoint>>>,
}

impl DataBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, point: DataPoint) -> usize {
        let mut points = self.points.write().unwrap_or_else(PoisonError::into_inner);
        points.push(point);
        points.len()
    }

    pub(crate) fn clear(&self) {
        self.points
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of samples recorded so far
    pub fn len(&self) -> usize {
        self.view().len()
    }

    /// Whether no samples have been recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Vec<DataPoint> {
        self.view().snapshot()
    }

    /// Read-only handle that observes this buffer from other threads
    pub fn view(&self) -> BufferView {
        BufferView {
            points: Arc::clone(&self.points),
        }
    }
}

/// Read-only, cloneable view onto a [`DataBuffer`]
#[derive(Debug, Clone)]
pub struct BufferView {
    points: Arc<RwLock<Vec<DataPoint>>>,
}

impl BufferView {
    /// Number of samples recorded so far
    pub fn len(&self) -> usize {
        self.points.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no samples have been recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current contents; never aliases the live buffer
    pub fn snapshot(&self) -> Vec<DataPoint> {
        self.points
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recent sample
    pub fn last(&self) -> Option<DataPoint> {
        self.points
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .copied()
    }
}
