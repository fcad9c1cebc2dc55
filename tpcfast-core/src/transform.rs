//! Raw TPC coordinates to space points.
//!
//! Coordinate systems used by the pipeline:
//!
//! 1. raw: row index, pad (continuous), drift time [time bin]
//! 2. drift volume `(x, u, v)` [cm]: `x` is the row's local x, `u` runs
//!    along local y in the direction of increasing pad number, `v` runs
//!    along z in the direction of increasing drift length. `u` and `v`
//!    are mirrored between the A and C sides.
//! 3. local `(x, y, z)` [cm]: the slice frame, x through the sector middle
//! 4. global: local rotated by the slice angle
//!
//! [`TpcFastTransform::transform`] converts raw coordinates to drift
//! coordinates with the drift calibration, applies the distortion
//! correction, converts to local coordinates, and finally applies the
//! time-of-flight correction to z.

use crate::calibration::Calibration;
use crate::distortion::{Distortion, DistortionModel, GridDistortion};
use crate::error::{Error, LayoutError, Result};
use crate::flat::{FlatBuffer, RegionLayout};
use crate::geometry::{RowInfo, Side, SliceInfo, NUMBER_OF_SLICES};
use crate::soa::{BatchStatistics, PadHitBatch, SpacePointBatch};
use log::{debug, trace};
use rayon::prelude::*;
use std::fmt;
use std::marker::PhantomData;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Cartesian position [cm].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpacePoint {
    /// x coordinate.
    pub x: f32,
    /// y coordinate.
    pub y: f32,
    /// z coordinate.
    pub z: f32,
}

impl SpacePoint {
    /// Creates a new point.
    #[inline]
    #[must_use]
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Rotates a slice-local point into the global frame.
    #[inline]
    #[must_use]
    pub fn to_global(&self, slice: &SliceInfo) -> Self {
        let (x, y) = slice.to_global(self.x, self.y);
        Self { x, y, z: self.z }
    }
}

/// Validated geometry of one `(slice, row)` query.
#[derive(Clone, Copy)]
struct Frame<'a> {
    side: Side,
    slice: &'a SliceInfo,
    row: &'a RowInfo,
}

impl Frame<'_> {
    /// Global y of drift coordinate `u`, for the drift velocity correction.
    #[inline]
    fn global_y(&self, u: f32) -> f32 {
        self.slice.global_y(self.row.x, self.side.mirror(u))
    }
}

/// Transformation of raw TPC coordinates to space points.
///
/// The geometry lives in a flat region `R` and is immutable; only the
/// calibration and its time stamp can change after construction. `D` is
/// the distortion engine nested in the region.
///
/// Queries are safe to run from many threads at once. Replacing the
/// calibration or moving the region needs `&mut self` or `self`, so the
/// borrow checker keeps those apart from readers.
pub struct TpcFastTransform<D = GridDistortion, R = FlatBuffer> {
    region: R,
    layout: RegionLayout,
    calibration: Calibration,
    distortion: PhantomData<fn() -> D>,
}

impl<D: DistortionModel> TpcFastTransform<D, FlatBuffer> {
    pub(crate) fn from_parts(
        region: FlatBuffer,
        layout: RegionLayout,
        calibration: Calibration,
    ) -> Self {
        Self {
            region,
            layout,
            calibration,
            distortion: PhantomData,
        }
    }
}

impl<D: DistortionModel, R: AsRef<[u8]>> TpcFastTransform<D, R> {
    /// Adopts an externally owned region.
    ///
    /// The region must hold bytes produced by a finished transform with the
    /// same distortion engine, start at [`Self::region_alignment`], and may
    /// be longer than the layout it holds.
    ///
    /// # Errors
    /// Returns [`Error::Layout`] if the region is misaligned, truncated or
    /// does not hold a valid layout.
    pub fn from_region(region: R, calibration: Calibration) -> Result<Self> {
        let bytes = region.as_ref();
        let layout = RegionLayout::parse(bytes, D::BUFFER_ALIGNMENT, D::KIND)?;
        let sub_region = bytes
            .get(layout.distortion_range())
            .ok_or(LayoutError::TooSmall {
                needed: layout.total_size,
                actual: bytes.len(),
            })?;
        D::check_flat(sub_region, layout.number_of_rows)?;
        debug!(
            "adopted {}-byte region at {:p} with {} rows",
            layout.total_size,
            bytes.as_ptr(),
            layout.number_of_rows
        );
        Ok(Self {
            region,
            layout,
            calibration,
            distortion: PhantomData,
        })
    }

    /// Alignment in bytes the region base must satisfy.
    #[must_use]
    pub fn region_alignment() -> usize {
        RegionLayout::region_alignment(D::BUFFER_ALIGNMENT)
    }

    /// Size of the flat region in bytes.
    #[must_use]
    pub fn flat_size(&self) -> usize {
        self.layout.total_size
    }

    /// The flat region; this is what gets copied or persisted.
    #[must_use]
    pub fn flat_bytes(&self) -> &[u8] {
        &self.region.as_ref()[..self.layout.total_size]
    }

    /// Address-independent layout of the region.
    #[must_use]
    pub fn layout(&self) -> &RegionLayout {
        &self.layout
    }

    /// The backing storage.
    #[must_use]
    pub fn region(&self) -> &R {
        &self.region
    }

    /// Deep-copies the region into caller-owned memory and returns a
    /// transform reading from the copy.
    ///
    /// # Errors
    /// Returns [`Error::Layout`] if `destination` is too small or misaligned.
    pub fn clone_into<'a>(
        &self,
        destination: &'a mut [u8],
    ) -> Result<TpcFastTransform<D, &'a [u8]>> {
        let source = self.flat_bytes();
        let actual = destination.len();
        let target = destination
            .get_mut(..source.len())
            .ok_or(LayoutError::TooSmall {
                needed: source.len(),
                actual,
            })?;
        target.copy_from_slice(source);
        let target: &'a [u8] = target;
        TpcFastTransform::from_region(target, self.calibration)
    }

    /// Copies the region into internally owned storage.
    #[must_use]
    pub fn to_owned_region(&self) -> TpcFastTransform<D, FlatBuffer> {
        TpcFastTransform {
            region: FlatBuffer::from_bytes(self.flat_bytes()),
            layout: self.layout,
            calibration: self.calibration,
            distortion: PhantomData,
        }
    }

    /// Releases the region and the calibration to the caller.
    pub fn into_region(self) -> (R, Calibration) {
        (self.region, self.calibration)
    }

    /// Moves the region with `mover` and re-adopts it at its new base.
    ///
    /// Offsets inside the region are base-relative, so the move itself needs
    /// no fix-up; the new location is validated before use.
    ///
    /// # Errors
    /// Returns [`Error::Layout`] if the moved region is invalid at its new
    /// address.
    pub fn relocate<R2, F>(self, mover: F) -> Result<TpcFastTransform<D, R2>>
    where
        R2: AsRef<[u8]>,
        F: FnOnce(R) -> R2,
    {
        let calibration = self.calibration;
        TpcFastTransform::from_region(mover(self.region), calibration)
    }

    /// Number of TPC slices.
    #[must_use]
    pub fn number_of_slices() -> usize {
        NUMBER_OF_SLICES
    }

    /// Number of TPC rows.
    #[must_use]
    pub fn number_of_rows(&self) -> usize {
        self.layout.number_of_rows
    }

    /// Row table.
    #[must_use]
    pub fn rows(&self) -> &[RowInfo] {
        self.region
            .as_ref()
            .get(self.layout.rows_range())
            .and_then(|bytes| bytemuck::try_cast_slice(bytes).ok())
            .unwrap_or(&[])
    }

    /// Slice table.
    #[must_use]
    pub fn slices(&self) -> &[SliceInfo] {
        self.region
            .as_ref()
            .get(self.layout.slices_range())
            .and_then(|bytes| bytemuck::try_cast_slice(bytes).ok())
            .unwrap_or(&[])
    }

    /// Geometry of one row.
    #[must_use]
    pub fn row_info(&self, row: usize) -> Option<&RowInfo> {
        self.rows().get(row)
    }

    /// Rotation of one slice.
    #[must_use]
    pub fn slice_info(&self, slice: usize) -> Option<&SliceInfo> {
        self.slices().get(slice)
    }

    /// Drift length of the A side [cm].
    #[must_use]
    pub fn z_length_a(&self) -> f32 {
        self.layout.z_length_a
    }

    /// Drift length of the C side [cm].
    #[must_use]
    pub fn z_length_c(&self) -> f32 {
        self.layout.z_length_c
    }

    /// Current calibration.
    #[must_use]
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Replaces the whole calibration, time stamp included.
    pub fn set_calibration(&mut self, calibration: Calibration) {
        debug!(
            "calibration replaced: time stamp {} -> {}",
            self.calibration.time_stamp, calibration.time_stamp
        );
        self.calibration = calibration;
    }

    /// Time stamp of the current calibration.
    #[must_use]
    pub fn time_stamp(&self) -> i64 {
        self.calibration.time_stamp
    }

    /// Sets the time stamp of the current calibration.
    pub fn set_time_stamp(&mut self, time_stamp: i64) {
        self.calibration.time_stamp = time_stamp;
    }

    fn frame(&self, slice: usize, row: usize) -> Result<Frame<'_>> {
        let slice_info = self.slice_info(slice).ok_or(Error::InvalidSlice {
            slice,
            count: NUMBER_OF_SLICES,
        })?;
        let row_info = self.row_info(row).ok_or(Error::InvalidRow {
            row,
            count: self.number_of_rows(),
        })?;
        Ok(Frame {
            side: Side::of_slice(slice),
            slice: slice_info,
            row: row_info,
        })
    }

    fn distortion_flat(&self) -> &[u8] {
        self.region
            .as_ref()
            .get(self.layout.distortion_range())
            .unwrap_or(&[])
    }

    #[inline]
    fn uv_in(&self, frame: &Frame<'_>, pad: f32, time: f32) -> (f32, f32) {
        let u = (pad - frame.row.pad_center()) * frame.row.pad_width;
        let v = self.calibration.drift_length(time, frame.global_y(u));
        (u, v)
    }

    #[inline]
    fn yz_in(&self, frame: &Frame<'_>, u: f32, v: f32) -> (f32, f32) {
        let y = frame.side.mirror(u);
        let z = match frame.side {
            Side::A => self.layout.z_length_a - v,
            Side::C => v - self.layout.z_length_c,
        };
        (y, z + self.calibration.alignment_z)
    }

    #[inline]
    fn tof_in(&self, frame: &Frame<'_>, x: f32, y: f32, z: f32) -> f32 {
        let dist_z = z - self.calibration.prim_vtx_z;
        let dv = -(x * x + y * y + dist_z * dist_z).sqrt() * self.calibration.tof_corr;
        // dv is an excess drift length; shift z the way uv_to_yz maps v
        match frame.side {
            Side::A => -dv,
            Side::C => dv,
        }
    }

    /// Converts `(pad, time)` to drift coordinates `(u, v)`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSlice`] or [`Error::InvalidRow`].
    pub fn pad_time_to_uv(
        &self,
        slice: usize,
        row: usize,
        pad: f32,
        time: f32,
    ) -> Result<(f32, f32)> {
        let frame = self.frame(slice, row)?;
        Ok(self.uv_in(&frame, pad, time))
    }

    /// Converts drift coordinates `(u, v)` back to `(pad, time)`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSlice`] or [`Error::InvalidRow`].
    pub fn uv_to_pad_time(
        &self,
        slice: usize,
        row: usize,
        u: f32,
        v: f32,
    ) -> Result<(f32, f32)> {
        let frame = self.frame(slice, row)?;
        let pad = u / frame.row.pad_width + frame.row.pad_center();
        let time = self.calibration.drift_time(v, frame.global_y(u));
        Ok((pad, time))
    }

    /// Converts drift coordinates `(u, v)` to local `(y, z)`, alignment included.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSlice`] or [`Error::InvalidRow`].
    pub fn uv_to_yz(&self, slice: usize, row: usize, u: f32, v: f32) -> Result<(f32, f32)> {
        let frame = self.frame(slice, row)?;
        Ok(self.yz_in(&frame, u, v))
    }

    /// Converts local `(y, z)` back to drift coordinates `(u, v)`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSlice`] or [`Error::InvalidRow`].
    pub fn yz_to_uv(&self, slice: usize, row: usize, y: f32, z: f32) -> Result<(f32, f32)> {
        let frame = self.frame(slice, row)?;
        let z = z - self.calibration.alignment_z;
        let u = frame.side.mirror(y);
        let v = match frame.side {
            Side::A => self.layout.z_length_a - z,
            Side::C => z + self.layout.z_length_c,
        };
        Ok((u, v))
    }

    /// Time-of-flight correction of z for a hit at local `(x, y, z)`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSlice`] or [`Error::InvalidRow`].
    pub fn tof_correction(
        &self,
        slice: usize,
        row: usize,
        x: f32,
        y: f32,
        z: f32,
    ) -> Result<f32> {
        let frame = self.frame(slice, row)?;
        Ok(self.tof_in(&frame, x, y, z))
    }

    /// Distortion correction at drift coordinates `(u, v)`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSlice`] or [`Error::InvalidRow`].
    pub fn distortion(&self, slice: usize, row: usize, u: f32, v: f32) -> Result<Distortion> {
        self.frame(slice, row)?;
        Ok(D::distortion(self.distortion_flat(), slice, row, u, v))
    }

    /// Transforms raw coordinates to a slice-local space point, taking the
    /// calibration, the distortion correction and the alignment into account.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSlice`] or [`Error::InvalidRow`].
    pub fn transform(
        &self,
        slice: usize,
        row: usize,
        pad: f32,
        time: f32,
    ) -> Result<SpacePoint> {
        let frame = self.frame(slice, row)?;
        Ok(self.point_in(&frame, slice, row, pad, time))
    }

    fn point_in(
        &self,
        frame: &Frame<'_>,
        slice: usize,
        row: usize,
        pad: f32,
        time: f32,
    ) -> SpacePoint {
        let (u, v) = self.uv_in(frame, pad, time);

        let d = D::distortion(self.distortion_flat(), slice, row, u, v);
        let x = frame.row.x + d.dx;
        let (y, z) = self.yz_in(frame, u + d.du, v + d.dv);

        let dz = self.tof_in(frame, x, y, z);
        SpacePoint::new(x, y, z + dz)
    }

    /// Like [`Self::transform`], rotated into the global frame.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSlice`] or [`Error::InvalidRow`].
    pub fn transform_to_global(
        &self,
        slice: usize,
        row: usize,
        pad: f32,
        time: f32,
    ) -> Result<SpacePoint> {
        let frame = self.frame(slice, row)?;
        let point = self.point_in(&frame, slice, row, pad, time);
        Ok(point.to_global(frame.slice))
    }

    /// Transforms a batch of hits in parallel.
    ///
    /// Hits with an invalid slice or row are skipped and counted as rejected.
    pub fn transform_batch(&self, hits: &PadHitBatch) -> (SpacePointBatch, BatchStatistics)
    where
        R: Sync,
    {
        let points: Vec<Option<SpacePoint>> = (0..hits.len())
            .into_par_iter()
            .map(|i| {
                let slice = usize::from(hits.slice[i]);
                let row = usize::from(hits.row[i]);
                match self.transform(slice, row, hits.pad[i], hits.time[i]) {
                    Ok(point) => Some(point),
                    Err(err) => {
                        trace!("skipping hit {i}: {err}");
                        None
                    }
                }
            })
            .collect();

        let mut batch = SpacePointBatch::with_capacity(points.len());
        let mut stats = BatchStatistics::default();
        for (i, point) in points.into_iter().enumerate() {
            match point {
                Some(point) => {
                    batch.push(hits.slice[i], hits.row[i], point, i);
                    stats.transformed += 1;
                }
                None => stats.rejected += 1,
            }
        }
        if stats.rejected > 0 {
            debug!(
                "batch transform: {} points, {} hits rejected",
                stats.transformed, stats.rejected
            );
        }
        (batch, stats)
    }
}

impl<D, R: AsRef<[u8]>> fmt::Debug for TpcFastTransform<D, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TpcFastTransform")
            .field("number_of_rows", &self.layout.number_of_rows)
            .field("flat_size", &self.layout.total_size)
            .field("region", &self.region.as_ref().as_ptr())
            .field("calibration", &self.calibration)
            .finish_non_exhaustive()
    }
}
