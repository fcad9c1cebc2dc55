//! Structure of Arrays (`SoA`) batches of raw hits and space points.
//!
//! All columns of a batch have the same length; `push` keeps them in step.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::transform::SpacePoint;

/// A batch of raw TPC hits in `SoA` format.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PadHitBatch {
    /// Slice index of each hit.
    pub slice: Vec<u16>,
    /// Row index of each hit.
    pub row: Vec<u16>,
    /// Pad coordinate of each hit.
    pub pad: Vec<f32>,
    /// Drift time of each hit [time bin].
    pub time: Vec<f32>,
}

impl PadHitBatch {
    /// Creates a new empty batch with specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slice: Vec::with_capacity(capacity),
            row: Vec::with_capacity(capacity),
            pad: Vec::with_capacity(capacity),
            time: Vec::with_capacity(capacity),
        }
    }

    /// Returns the number of hits in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slice.len()
    }

    /// Returns true if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slice.is_empty()
    }

    /// Clears all vectors in the batch.
    pub fn clear(&mut self) {
        self.slice.clear();
        self.row.clear();
        self.pad.clear();
        self.time.clear();
    }

    /// Appends all hits from another batch to this one.
    pub fn append(&mut self, other: &PadHitBatch) {
        self.slice.extend_from_slice(&other.slice);
        self.row.extend_from_slice(&other.row);
        self.pad.extend_from_slice(&other.pad);
        self.time.extend_from_slice(&other.time);
    }

    /// Pushes a single hit into the batch.
    pub fn push(&mut self, slice: u16, row: u16, pad: f32, time: f32) {
        self.slice.push(slice);
        self.row.push(row);
        self.pad.push(pad);
        self.time.push(time);
    }
}

/// A batch of transformed space points in `SoA` format.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpacePointBatch {
    /// Slice index of each point.
    pub slice: Vec<u16>,
    /// Row index of each point.
    pub row: Vec<u16>,
    /// Local x [cm].
    pub x: Vec<f32>,
    /// Local y [cm].
    pub y: Vec<f32>,
    /// z [cm].
    pub z: Vec<f32>,
    /// Index of the source hit in the input batch.
    pub hit_index: Vec<usize>,
}

impl SpacePointBatch {
    /// Creates a new empty batch with specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slice: Vec::with_capacity(capacity),
            row: Vec::with_capacity(capacity),
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            z: Vec::with_capacity(capacity),
            hit_index: Vec::with_capacity(capacity),
        }
    }

    /// Returns the number of points in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Returns true if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Pushes a single point into the batch.
    pub fn push(&mut self, slice: u16, row: u16, point: SpacePoint, hit_index: usize) {
        self.slice.push(slice);
        self.row.push(row);
        self.x.push(point.x);
        self.y.push(point.y);
        self.z.push(point.z);
        self.hit_index.push(hit_index);
    }

    /// Returns the point at `index`.
    #[must_use]
    pub fn point(&self, index: usize) -> Option<SpacePoint> {
        Some(SpacePoint::new(
            *self.x.get(index)?,
            *self.y.get(index)?,
            *self.z.get(index)?,
        ))
    }
}

/// Outcome counts of a batch transformation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BatchStatistics {
    /// Hits converted to space points.
    pub transformed: usize,
    /// Hits skipped for an invalid slice or row.
    pub rejected: usize,
}
