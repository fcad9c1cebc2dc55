//! Two-phase construction of a transform.
//!
//! Construction stages the geometry in growable storage and bakes it into
//! a flat region in one step:
//!
//! 1. [`TransformBuilder::start`] reserves the rows
//! 2. rows, slice rotations, drift lengths and calibration are set in any order
//! 3. [`TransformBuilder::finish`] consumes the builder together with a
//!    finished distortion engine and returns an immutable transform
//!
//! Because `finish` takes the builder by value, touching the staging area
//! after the region is built does not compile:
//!
//! ```compile_fail
//! use tpcfast_core::{Calibration, NoDistortion, TransformBuilder};
//!
//! let mut builder = TransformBuilder::start(1).unwrap();
//! builder.set_row(0, 85.0, 4, 0.4).unwrap();
//! builder.set_geometry(250.0, 250.0).set_calibration(Calibration::default());
//! let transform = builder.finish(NoDistortion).unwrap();
//! builder.set_row(0, 86.0, 4, 0.4).unwrap();
//! ```

use crate::calibration::Calibration;
use crate::distortion::DistortionModel;
use crate::error::{ConstructionError, Result};
use crate::flat::{FlatBuffer, RegionLayout, HEADER_SIZE};
use crate::geometry::{RowInfo, SliceInfo, NUMBER_OF_SLICES};
use crate::transform::TpcFastTransform;
use log::debug;
use std::ops::BitOr;

/// Progress flags of a construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConstructionState(u32);

impl ConstructionState {
    /// Rows are reserved and the builder accepts input.
    pub const IN_PROGRESS: Self = Self(0x1);
    /// Drift lengths of both sides are set.
    pub const GEOMETRY_SET: Self = Self(0x4);
    /// Drift calibration is set.
    pub const CALIBRATION_SET: Self = Self(0x8);

    /// Raw flag bits.
    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every flag of `other` is set.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl BitOr for ConstructionState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Staging area for a [`TpcFastTransform`].
#[derive(Debug, Clone)]
pub struct TransformBuilder {
    rows: Vec<RowInfo>,
    filled: Vec<bool>,
    rows_set: usize,
    slices: [SliceInfo; NUMBER_OF_SLICES],
    z_lengths: Option<(f32, f32)>,
    calibration: Option<Calibration>,
    state: ConstructionState,
}

impl TransformBuilder {
    /// Starts a construction for `number_of_rows` pad rows.
    ///
    /// Slices start at their nominal sector rotation.
    ///
    /// # Errors
    /// Returns an error if `number_of_rows` is zero or exceeds `u32::MAX`.
    pub fn start(number_of_rows: usize) -> Result<Self> {
        if number_of_rows == 0 {
            return Err(ConstructionError::ZeroRows.into());
        }
        if u32::try_from(number_of_rows).is_err() {
            return Err(ConstructionError::TooManyRows(number_of_rows).into());
        }
        Ok(Self {
            rows: vec![RowInfo::default(); number_of_rows],
            filled: vec![false; number_of_rows],
            rows_set: 0,
            slices: std::array::from_fn(SliceInfo::nominal),
            z_lengths: None,
            calibration: None,
            state: ConstructionState::IN_PROGRESS,
        })
    }

    /// Number of reserved rows.
    #[must_use]
    pub fn number_of_rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of distinct rows initialized so far.
    #[must_use]
    pub fn rows_set(&self) -> usize {
        self.rows_set
    }

    /// Current progress flags.
    #[must_use]
    pub fn state(&self) -> ConstructionState {
        self.state
    }

    /// Initializes one pad row. Setting a row twice overwrites it.
    ///
    /// # Errors
    /// Returns an error if `row` is out of range or `number_of_pads` is zero.
    pub fn set_row(
        &mut self,
        row: usize,
        x: f32,
        number_of_pads: u32,
        pad_width: f32,
    ) -> Result<&mut Self> {
        let count = self.rows.len();
        if row >= count {
            return Err(ConstructionError::RowOutOfRange { row, count }.into());
        }
        if number_of_pads == 0 {
            return Err(ConstructionError::InvalidPadCount { row }.into());
        }
        self.rows[row] = RowInfo::new(x, number_of_pads, pad_width);
        if !self.filled[row] {
            self.filled[row] = true;
            self.rows_set += 1;
        }
        Ok(self)
    }

    /// Overrides the rotation of one slice.
    ///
    /// # Errors
    /// Returns an error if `slice` is out of range.
    pub fn set_slice(&mut self, slice: usize, info: SliceInfo) -> Result<&mut Self> {
        let entry = self
            .slices
            .get_mut(slice)
            .ok_or(ConstructionError::SliceOutOfRange {
                slice,
                count: NUMBER_OF_SLICES,
            })?;
        *entry = info;
        Ok(self)
    }

    /// Overrides the rotation of one slice by its angle in radians.
    ///
    /// # Errors
    /// Returns an error if `slice` is out of range.
    pub fn set_slice_alpha(&mut self, slice: usize, alpha: f32) -> Result<&mut Self> {
        self.set_slice(slice, SliceInfo::from_alpha(alpha))
    }

    /// Sets the drift lengths of the A and C sides [cm].
    pub fn set_geometry(&mut self, z_length_a: f32, z_length_c: f32) -> &mut Self {
        self.z_lengths = Some((z_length_a, z_length_c));
        self.state.insert(ConstructionState::GEOMETRY_SET);
        self
    }

    /// Sets the drift calibration.
    pub fn set_calibration(&mut self, calibration: Calibration) -> &mut Self {
        self.calibration = Some(calibration);
        self.state.insert(ConstructionState::CALIBRATION_SET);
        self
    }

    /// Bakes the staged geometry and the distortion engine into a flat
    /// region and returns the finished transform.
    ///
    /// # Errors
    /// Returns an error if a row, the geometry or the calibration is
    /// missing, or if the distortion engine does not fit the detector.
    #[allow(clippy::needless_pass_by_value)]
    pub fn finish<D: DistortionModel>(self, distortion: D) -> Result<TpcFastTransform<D>> {
        let expected = self.rows.len();
        if self.rows_set != expected {
            return Err(ConstructionError::IncompleteRows {
                set: self.rows_set,
                expected,
            }
            .into());
        }
        let (z_length_a, z_length_c) = self.z_lengths.ok_or(ConstructionError::GeometryNotSet)?;
        let calibration = self
            .calibration
            .ok_or(ConstructionError::CalibrationNotSet)?;
        if !distortion.covers_rows(expected) {
            return Err(ConstructionError::Distortion(format!(
                "engine does not cover {expected} rows"
            ))
            .into());
        }
        let alignment = RegionLayout::region_alignment(D::BUFFER_ALIGNMENT);
        if alignment > FlatBuffer::ALIGNMENT {
            return Err(ConstructionError::Distortion(format!(
                "engine alignment {alignment} exceeds the {} bytes of owned storage",
                FlatBuffer::ALIGNMENT
            ))
            .into());
        }

        let layout = RegionLayout::plan(
            expected,
            distortion.flat_size(),
            D::BUFFER_ALIGNMENT,
            z_length_a,
            z_length_c,
        );
        let mut buffer = FlatBuffer::zeroed(layout.total_size);
        let bytes = buffer.as_bytes_mut();
        bytes[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&layout.header(D::KIND)));
        bytes[layout.slices_range()].copy_from_slice(bytemuck::cast_slice(&self.slices[..]));
        bytes[layout.rows_range()].copy_from_slice(bytemuck::cast_slice(&self.rows[..]));
        distortion.write_flat(&mut bytes[layout.distortion_range()])?;

        debug!(
            "finished transform: {} rows, {}-byte region ({} bytes of distortion data)",
            expected, layout.total_size, layout.distortion_size
        );
        Ok(TpcFastTransform::from_parts(buffer, layout, calibration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distortion::{GridDistortion, NoDistortion};
    use crate::error::Error;

    fn staged(rows: usize) -> TransformBuilder {
        let mut builder = TransformBuilder::start(rows).unwrap();
        for row in 0..rows {
            #[allow(clippy::cast_precision_loss)]
            let x = 85.0 + row as f32;
            builder.set_row(row, x, 66, 0.4).unwrap();
        }
        builder
            .set_geometry(250.0, 250.0)
            .set_calibration(Calibration::default());
        builder
    }

    #[test]
    fn test_start_requires_rows() {
        assert!(matches!(
            TransformBuilder::start(0),
            Err(Error::Construction(ConstructionError::ZeroRows))
        ));
    }

    #[test]
    fn test_state_flags() {
        let mut builder = TransformBuilder::start(2).unwrap();
        assert_eq!(builder.state(), ConstructionState::IN_PROGRESS);

        builder.set_geometry(250.0, 250.0);
        assert!(builder.state().contains(ConstructionState::GEOMETRY_SET));
        let state = builder.state();
        assert!(!state.contains(ConstructionState::CALIBRATION_SET));

        builder.set_calibration(Calibration::default());
        assert!(builder.state().contains(
            ConstructionState::IN_PROGRESS
                | ConstructionState::GEOMETRY_SET
                | ConstructionState::CALIBRATION_SET
        ));
        assert_eq!(builder.state().bits(), 0xd);
    }

    #[test]
    fn test_set_row_bounds() {
        let mut builder = TransformBuilder::start(2).unwrap();
        assert!(builder.set_row(2, 85.0, 10, 0.4).is_err());
        assert!(matches!(
            builder.set_row(0, 85.0, 0, 0.4),
            Err(Error::Construction(ConstructionError::InvalidPadCount { row: 0 }))
        ));
        assert_eq!(builder.rows_set(), 0);
    }

    #[test]
    fn test_finish_before_all_rows_fails() {
        let mut builder = TransformBuilder::start(3).unwrap();
        builder.set_row(0, 85.0, 10, 0.4).unwrap();
        builder.set_row(1, 86.0, 10, 0.4).unwrap();
        builder
            .set_geometry(250.0, 250.0)
            .set_calibration(Calibration::default());
        assert_eq!(
            builder.finish(NoDistortion).unwrap_err(),
            Error::Construction(ConstructionError::IncompleteRows {
                set: 2,
                expected: 3
            })
        );
    }

    #[test]
    fn test_duplicate_row_is_counted_once() {
        let mut builder = TransformBuilder::start(2).unwrap();
        builder.set_row(0, 85.0, 10, 0.4).unwrap();
        builder.set_row(0, 85.5, 12, 0.4).unwrap();
        assert_eq!(builder.rows_set(), 1);
        builder
            .set_geometry(250.0, 250.0)
            .set_calibration(Calibration::default());
        assert!(builder.finish(NoDistortion).is_err());
    }

    #[test]
    fn test_finish_requires_geometry_and_calibration() {
        let mut builder = TransformBuilder::start(1).unwrap();
        builder.set_row(0, 85.0, 10, 0.4).unwrap();
        let no_geometry = builder.clone();
        assert_eq!(
            no_geometry.finish(NoDistortion).unwrap_err(),
            Error::Construction(ConstructionError::GeometryNotSet)
        );

        builder.set_geometry(250.0, 250.0);
        assert_eq!(
            builder.finish(NoDistortion).unwrap_err(),
            Error::Construction(ConstructionError::CalibrationNotSet)
        );
    }

    #[test]
    fn test_finish_checks_distortion_rows() {
        let result = staged(3).finish(GridDistortion::zero(2));
        assert!(matches!(
            result,
            Err(Error::Construction(ConstructionError::Distortion(_)))
        ));
        assert!(staged(3).finish(GridDistortion::zero(3)).is_ok());
    }

    #[test]
    fn test_slice_override() {
        let mut builder = staged(1);
        builder.set_slice_alpha(0, 0.0).unwrap();
        assert!(builder.set_slice_alpha(36, 0.0).is_err());
        let transform = builder.finish(NoDistortion).unwrap();
        let slice = transform.slice_info(0).unwrap();
        assert!(slice.sin_alpha.abs() < f32::EPSILON);
        assert!((slice.cos_alpha - 1.0).abs() < f32::EPSILON);
        assert_eq!(transform.slice_info(1), Some(&SliceInfo::nominal(1)));
    }

    #[test]
    fn test_finish_copies_rows() {
        let transform = staged(4).finish(NoDistortion).unwrap();
        assert_eq!(transform.number_of_rows(), 4);
        assert_eq!(transform.rows().len(), 4);
        assert_eq!(transform.row_info(3), Some(&RowInfo::new(88.0, 66, 0.4)));
        assert_eq!(transform.row_info(4), None);
    }
}
